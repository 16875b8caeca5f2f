use uuid::Uuid;

pub type ArtifactId = Uuid;
pub type SessionId = Uuid;
pub type JobId = Uuid;
pub type OutputLine = String;
pub type Program = String;
pub type Args = Vec<String>;
