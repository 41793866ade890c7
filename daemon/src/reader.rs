//! Sampling tool invocation and its line stream

use crate::error::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

type ArgBuilder = fn(f64) -> Vec<String>;

/// macOS `top`: logging mode, unlimited samples, whole-second delay of at least 1.
fn darwin_args(delay: f64) -> Vec<String> {
    let seconds = if delay < 1.0 { 1.0 } else { delay.round() };
    vec!["-l".into(), "0".into(), "-s".into(), format!("{}", seconds)]
}

/// procps `top`: batch mode with the delay passed through as given.
fn linux_args(delay: f64) -> Vec<String> {
    vec!["-b".into(), "-d".into(), format!("{}", delay)]
}

/// Platform identifier (as in `std::env::consts::OS`) to argument builder.
/// `None` marks a platform we know we can't drive.
const PLATFORM_ARGS: &[(&str, Option<ArgBuilder>)] = &[
    ("macos", Some(darwin_args as ArgBuilder)),
    ("linux", Some(linux_args as ArgBuilder)),
    ("windows", None),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplingArgs {
    /// Arguments making the tool repeat every `delay` seconds.
    Repeat(Vec<String>),
    /// Listed in the table as a platform the tool can't be driven on.
    Unsupported,
    /// Not in the table at all.
    Unknown,
}

/// Looks up how to make the sampling tool repeat every `delay` seconds on `os`.
pub fn sampling_args(os: &str, delay: f64) -> SamplingArgs {
    match PLATFORM_ARGS.iter().find(|(name, _)| *name == os) {
        Some((_, Some(build))) => SamplingArgs::Repeat(build(delay)),
        Some((_, None)) => SamplingArgs::Unsupported,
        None => SamplingArgs::Unknown,
    }
}

/// A lazy, non-restartable stream of lines from the sampling tool.
pub struct SnapshotReader {
    child: Option<Child>,
    source: Box<dyn AsyncBufRead + Send + Unpin>,
    buf: Vec<u8>,
}

impl SnapshotReader {
    /// Spawns `program` with `args` and reads its stdout.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn { program: program.to_string(), source })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
            program: program.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout not captured"),
        })?;
        debug!("Spawned {} {:?} (pid {:?})", program, args, child.id());
        Ok(Self::with_child(Some(child), BufReader::new(stdout)))
    }

    /// Reads lines from an arbitrary buffered source with no process behind it.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self::with_child(None, reader)
    }

    fn with_child<R>(child: Option<Child>, reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            child,
            source: Box::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line, or `None` once the stream has ended. Bytes that aren't
    /// valid UTF-8 come through as U+FFFD.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        // partial reads stay in `buf` if this future is dropped mid-line
        if self.source.read_until(b'\n', &mut self.buf).await? == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Ok(Some(line))
    }

    /// Kills the tool (if any) and waits for it to exit.
    pub async fn close(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop sampling tool: {}", e);
            }
        }
    }
}
