use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use futures::{Stream, StreamExt as _};
use log::debug;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::error::FileError;

/// Lines of a child's output, in emission order, without the line terminator.
pub type LineStream = Pin<Box<dyn Stream<Item = std::io::Result<String>> + Send>>;

/// An external program plus the arguments that always precede the per-call ones
/// (e.g. `wine ffmpeg.exe` or `sh ./fake-ffmpeg.sh`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    program: PathBuf,
    prefix_args: Vec<OsString>,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Starts the tool with both output streams piped.
    ///
    /// Failing to start is an error for this invocation only; nothing is retried.
    pub fn spawn<I, S>(&self, args: I) -> Result<ToolInvocation, FileError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running: {:?}", cmd.as_std());

        let mut child = cmd.spawn().map_err(|e| FileError::Spawn {
            program: self.program.display().to_string(),
            source: e,
        })?;

        let stdout: LineStream = match child.stdout.take() {
            Some(out) => line_stream(out),
            None => Box::pin(futures::stream::empty()),
        };
        let stderr: LineStream = match child.stderr.take() {
            Some(err) => line_stream(err),
            None => Box::pin(futures::stream::empty()),
        };

        Ok(ToolInvocation {
            completion: Completion { child },
            stdout,
            stderr,
        })
    }
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.prefix_args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// A running tool. Both line streams must be drained (or the whole
/// invocation dropped) before waiting on `completion`, otherwise a full pipe
/// can keep the child from exiting. Dropping kills the child.
pub struct ToolInvocation {
    pub completion: Completion,
    pub stdout: LineStream,
    pub stderr: LineStream,
}

impl ToolInvocation {
    /// Drains whatever is left on both streams, then waits for exit.
    pub async fn finish(mut self) -> Result<ExitStatus, FileError> {
        let (out, err) = tokio::join!(drain(&mut self.stdout), drain(&mut self.stderr));
        out?;
        err?;
        self.completion.wait().await
    }
}

pub struct Completion {
    child: Child,
}

impl Completion {
    pub async fn wait(mut self) -> Result<ExitStatus, FileError> {
        Ok(self.child.wait().await?)
    }
}

/// Reads the rest of a stream into memory.
pub async fn collect_lines(stream: &mut LineStream) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    while let Some(line) = stream.next().await {
        lines.push(line?);
    }
    Ok(lines)
}

/// Consumes the rest of a stream, discarding it.
pub async fn drain(stream: &mut LineStream) -> std::io::Result<()> {
    while let Some(line) = stream.next().await {
        line?;
    }
    Ok(())
}

fn line_stream<R>(reader: R) -> LineStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // A read error ends the stream after being yielded once.
    let stream = futures::stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn line_stream_strips_terminators() {
        let input: &[u8] = b"first\r\nsecond\n\nlast without newline";
        let mut stream = line_stream(input);
        let lines = collect_lines(&mut stream).await.unwrap();
        assert_eq!(lines, vec!["first", "second", "", "last without newline"]);
    }

    #[tokio::test]
    async fn line_stream_is_lossy_on_invalid_utf8() {
        let input: &[u8] = b"ok\n\xff\xfe name\n";
        let mut stream = line_stream(input);
        let lines = collect_lines(&mut stream).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with(" name"));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let tool = ExternalTool::new("/definitely/not/a/real/tool");
        match tool.spawn(["-version"]) {
            Err(FileError::Spawn { program, .. }) => {
                assert_eq!(program, "/definitely/not/a/real/tool")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn both_streams_are_captured() {
        let tool = ExternalTool::new("sh").with_prefix_args(["-c"]);
        let mut inv = tool
            .spawn(["echo out1; echo err1 >&2; echo out2; exit 3"])
            .unwrap();
        let (out, err) = tokio::join!(
            collect_lines(&mut inv.stdout),
            collect_lines(&mut inv.stderr)
        );
        assert_eq!(out.unwrap(), vec!["out1", "out2"]);
        assert_eq!(err.unwrap(), vec!["err1"]);
        let status = inv.finish().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn display_includes_prefix_args() {
        let tool = ExternalTool::new("wine").with_prefix_args(["ffmpeg.exe"]);
        assert_eq!(tool.to_string(), "wine ffmpeg.exe");
    }
}
