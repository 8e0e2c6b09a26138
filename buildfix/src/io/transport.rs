//! Duplex byte streams attached to an interactive shell.
//!
//! [`Transport`] is the seam between the command channel and whatever carries
//! the bytes. Production uses [`ProcessTransport`] (a child process such as
//! `docker exec -i`); tests use scripted transports.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Outcome of a single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    Data(Vec<u8>),
    /// Nothing arrived within the timeout; the stream is still open.
    Idle,
    /// The peer closed the stream.
    Closed,
}

pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Wait at most `timeout` for the next chunk.
    fn recv(&mut self, timeout: Duration) -> Result<Recv>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

enum ReaderEvent {
    Chunk(Vec<u8>),
    Eof,
}

/// Transport over a child process's stdin and merged stdout/stderr.
pub struct ProcessTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    rx: Receiver<ReaderEvent>,
    open_streams: usize,
}

impl ProcessTransport {
    #[instrument(skip_all, fields(program = ?cmd.get_program()))]
    pub fn spawn(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn shell {:?}", cmd.get_program()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, tx.clone());
        spawn_reader(stderr, tx);
        debug!(pid = child.id(), "shell transport started");

        Ok(Self {
            child,
            stdin: Some(stdin),
            rx,
            open_streams: 2,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: Sender<ReaderEvent>) {
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(ReaderEvent::Eof);
                    return;
                }
                Ok(n) => {
                    if tx.send(ReaderEvent::Chunk(chunk[..n].to_vec())).is_err() {
                        return;
                    }
                }
            }
        }
    });
}

impl Transport for ProcessTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("shell stdin already closed"))?;
        stdin.write_all(bytes).context("write to shell")?;
        stdin.flush().context("flush shell stdin")?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Recv> {
        if self.open_streams == 0 {
            return Ok(Recv::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(ReaderEvent::Chunk(bytes)) => Ok(Recv::Data(bytes)),
            Ok(ReaderEvent::Eof) => {
                self.open_streams -= 1;
                if self.open_streams == 0 {
                    Ok(Recv::Closed)
                } else {
                    Ok(Recv::Idle)
                }
            }
            Err(RecvTimeoutError::Timeout) => Ok(Recv::Idle),
            Err(RecvTimeoutError::Disconnected) => {
                self.open_streams = 0;
                Ok(Recv::Closed)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.stdin = None;
        if self
            .child
            .wait_timeout(Duration::from_secs(2))
            .context("wait for shell exit")?
            .is_none()
        {
            warn!(pid = self.child.id(), "shell did not exit after stdin closed, killing");
            self.child.kill().context("kill shell")?;
            self.child.wait().context("wait shell after kill")?;
        }
        Ok(())
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
