use crate::error::{Error, Result};
use crate::events::JobStatus;
use crate::types::{Args, JobId, OutputLine, Program};

use bytes::{Buf, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::{
    io,
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
};

/// Where the external analysis tool lives and how to invoke it.
///
/// The artifact path is appended after `args` as the final argument.
#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub program: Program,
    pub args: Args,
    pub working_dir: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: vec!["-u".into(), "scripts/run.py".into()],
            working_dir: "/forest_tool/FSCT".into(),
        }
    }
}

/// Launches one child process per job.
#[derive(Clone, Debug)]
pub struct JobRunner {
    tool: ToolConfig,
}

impl JobRunner {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }

    /// Spawn the tool on `artifact_path`. Returns as soon as the process exists.
    pub fn start(&self, artifact_path: &Path) -> Result<JobHandle> {
        if !self.tool.working_dir.is_dir() {
            return Err(Error::Launch(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "working directory {} does not exist",
                    self.tool.working_dir.display()
                ),
            )));
        }
        let child = Command::new(&self.tool.program)
            .args(&self.tool.args)
            .arg(artifact_path)
            .current_dir(&self.tool.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::Launch)?;

        let handle = JobHandle::new(child);
        tracing::info!(
            job = %handle.id,
            pid = ?handle.pid(),
            program = %self.tool.program,
            artifact = %artifact_path.display(),
            "job started"
        );
        Ok(handle)
    }
}

/// A running job. Owns the child process and both of its output pipes.
pub struct JobHandle {
    id: JobId,
    child: Child,
    stdout: Option<OutputLines>,
    stderr: Option<OutputLines>,
}

impl JobHandle {
    fn new(mut child: Child) -> Self {
        let stdout = child.stdout.take().map(OutputLines::new);
        let stderr = child.stderr.take().map(OutputLines::new);
        Self {
            id: uuid::Uuid::new_v4(),
            child,
            stdout,
            stderr,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// The child's stdout as lines. Can only be taken once.
    pub fn stdout_lines(&mut self) -> Option<OutputLines> {
        self.stdout.take()
    }

    /// The child's stderr as lines. Can only be taken once.
    pub fn stderr_lines(&mut self) -> Option<OutputLines> {
        self.stderr.take()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> io::Result<JobStatus> {
        self.child.wait().await.map(JobStatus::from)
    }
}

/// Lines read from one of a child's pipes, yielded as soon as the child flushes them.
///
/// Lines end at `\n`, `\r\n` or a lone `\r`. Bytes are decoded lossily, surrounding whitespace is trimmed,
/// blank lines are dropped, and an unterminated fragment left at close comes out as the last line. A read
/// error ends the stream.
pub struct OutputLines {
    inner: BoxStream<'static, OutputLine>,
}

impl OutputLines {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let inner = stream::unfold(LineReader::new(reader), |mut reader| async move {
            reader.next_line().await.map(|line| (line, reader))
        })
        .boxed();
        Self { inner }
    }
}

impl Stream for OutputLines {
    type Item = OutputLine;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

struct LineReader<R> {
    reader: R,
    buf: BytesMut,
    // bytes of `buf` already known to hold no terminator
    scanned: usize,
    // the last line ended in `\r`; a `\n` arriving next belongs to it
    skip_lf: bool,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
            skip_lf: false,
            eof: false,
        }
    }

    async fn next_line(&mut self) -> Option<OutputLine> {
        loop {
            if self.skip_lf && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
                self.skip_lf = false;
            }
            let found = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r');
            if let Some(offset) = found {
                let raw = self.buf.split_to(self.scanned + offset + 1);
                self.scanned = 0;
                // a lone `\r` is a line break too, so progress bars come through as they redraw
                self.skip_lf = raw.last() == Some(&b'\r');
                match decode(&raw) {
                    Some(line) => return Some(line),
                    None => continue,
                }
            }
            self.scanned = self.buf.len();
            if self.eof {
                if self.buf.is_empty() {
                    return None;
                }
                let raw = self.buf.split();
                self.scanned = 0;
                return decode(&raw);
            }
            self.buf.reserve(4096);
            match self.reader.read_buf(&mut self.buf).await {
                Ok(n) if n > 0 => {}
                Ok(_) => self.eof = true,
                Err(err) => {
                    tracing::debug!(error = %err, "output pipe read failed");
                    self.eof = true;
                }
            }
        }
    }
}

fn decode(raw: &[u8]) -> Option<OutputLine> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
