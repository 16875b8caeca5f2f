use std::{io, result};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error("Unauthorized access")]
    Forbidden,
    #[error("storage error: {0}")]
    Storage(#[source] io::Error),
    #[error("failed to launch tool: {0}")]
    Launch(#[source] io::Error),
}

pub type Result<T> = result::Result<T, Error>;
