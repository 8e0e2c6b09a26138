//! Command channel: run one shell command at a time over a raw byte stream.
//!
//! The shell prompt is replaced with one that carries [`SENTINEL`], so the end
//! of a command's output is the next appearance of the sentinel. Output is
//! stripped of control sequences before the sentinel search.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::ansi::AnsiStripper;
use crate::core::budget::remaining_until;
use crate::core::framing::{ResponseParser, find_subslice};
use crate::io::config::ChannelConfig;
use crate::io::transport::{Recv, Transport};

/// Reserved marker embedded in the shell prompt.
pub const SENTINEL: &str = "__BUILDFIX_PROMPT_READY__";

/// Prompt text printed in front of the sentinel.
pub const PROMPT_PREFIX: &str = "$ ";

/// Appended to the output of a command that hit the total timeout.
pub const INTERRUPTED_NOTICE: &str = "[buildfix: command likely interrupted due to timeout/hang]";

/// Appended to the output of a command during which the shell went away.
pub const CLOSED_NOTICE: &str = "[buildfix: shell session closed]";

const INTERRUPT_BYTE: u8 = 0x03;

/// The shell stream is gone; no further commands can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelClosedError;

impl fmt::Display for ChannelClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("shell channel closed")
    }
}

impl std::error::Error for ChannelClosedError {}

/// Timeouts governing reads on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    pub read: Duration,
    pub total: Duration,
    pub grace: Duration,
    pub init: Duration,
}

impl From<&ChannelConfig> for ChannelTimeouts {
    fn from(cfg: &ChannelConfig) -> Self {
        Self {
            read: cfg.read_timeout(),
            total: cfg.command_timeout(),
            grace: cfg.grace(),
            init: cfg.init_timeout(),
        }
    }
}

/// Owns the transport of one shell session. One command in flight at a time.
pub struct Channel {
    transport: Box<dyn Transport>,
    timeouts: ChannelTimeouts,
    stripper: AnsiStripper,
    closed: bool,
    needs_resync: bool,
}

impl Channel {
    pub fn new(transport: Box<dyn Transport>, timeouts: ChannelTimeouts) -> Self {
        Self {
            transport,
            timeouts,
            stripper: AnsiStripper::new(),
            closed: false,
            needs_resync: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The line that installs the sentinel prompt.
    ///
    /// The sentinel is written as two adjacent quoted halves so the echo of this
    /// line cannot itself complete the handshake.
    pub fn setup_line() -> String {
        let (head, tail) = SENTINEL.split_at(SENTINEL.len() / 2);
        format!("PS1='{PROMPT_PREFIX}{head}''{tail} '; PS2=''; export PS1 PS2\n")
    }

    /// Install the sentinel prompt and wait for it to appear.
    #[instrument(skip_all)]
    pub fn initialize(&mut self) -> Result<()> {
        self.transport
            .send(Self::setup_line().as_bytes())
            .context("send prompt setup")?;
        if !self.wait_for_sentinel(self.timeouts.init)? {
            if self.closed {
                return Err(anyhow!(ChannelClosedError)).context("shell exited during setup");
            }
            return Err(anyhow!(
                "shell prompt did not appear within {:?}",
                self.timeouts.init
            ));
        }
        debug!("shell channel ready");
        Ok(())
    }

    /// Run `command` and return its cleaned output.
    ///
    /// A command that exceeds the total timeout is interrupted and its partial
    /// output is returned with [`INTERRUPTED_NOTICE`] appended; the shell stays
    /// usable. Fails with [`ChannelClosedError`] once the stream is gone.
    #[instrument(skip_all, fields(command_len = command.len()))]
    pub fn execute(&mut self, command: &str) -> Result<String> {
        if self.closed {
            return Err(anyhow!(ChannelClosedError));
        }
        self.settle()?;
        if self.closed {
            return Err(anyhow!(ChannelClosedError));
        }

        let command = command.trim();
        let mut line = command.to_string();
        line.push('\n');
        self.stripper.reset();
        if let Err(err) = self.transport.send(line.as_bytes()) {
            self.closed = true;
            return Err(err.context(ChannelClosedError));
        }

        let mut parser = ResponseParser::new(command, SENTINEL, PROMPT_PREFIX);
        let deadline = Instant::now() + self.timeouts.total;
        let mut interrupted = false;
        while !parser.is_complete() {
            let Some(left) = remaining_until(deadline) else {
                interrupted = true;
                break;
            };
            match self.transport.recv(left.min(self.timeouts.read))? {
                Recv::Data(bytes) => {
                    parser.feed(&self.stripper.feed(&bytes));
                }
                Recv::Idle => {}
                Recv::Closed => {
                    warn!("shell closed while a command was running");
                    self.closed = true;
                    break;
                }
            }
        }

        if interrupted {
            warn!(
                timeout_secs = self.timeouts.total.as_secs(),
                "command exceeded total timeout, interrupting"
            );
            parser.interrupt();
            self.interrupt_and_grace_read(&mut parser)?;
            self.needs_resync = !parser.saw_sentinel();
        }

        let text = parser.finish();
        let notice = if interrupted {
            Some(INTERRUPTED_NOTICE)
        } else if self.closed {
            Some(CLOSED_NOTICE)
        } else {
            None
        };
        Ok(match notice {
            Some(notice) if text.is_empty() => notice.to_string(),
            Some(notice) => format!("{text}\n{notice}"),
            None => text,
        })
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.transport.close()
    }

    fn interrupt_and_grace_read(&mut self, parser: &mut ResponseParser) -> Result<()> {
        if let Err(err) = self.transport.send(&[INTERRUPT_BYTE]) {
            warn!(err = %err, "failed to send interrupt");
        }
        match self.transport.recv(self.timeouts.grace)? {
            Recv::Data(bytes) => {
                parser.feed(&self.stripper.feed(&bytes));
            }
            Recv::Idle => {}
            Recv::Closed => self.closed = true,
        }
        Ok(())
    }

    /// Discard stale bytes before a new command.
    ///
    /// After an interrupted command whose prompt never came back, wait a grace
    /// period for the prompt so its leftovers cannot complete the next command.
    fn settle(&mut self) -> Result<()> {
        if self.needs_resync {
            self.needs_resync = false;
            if !self.wait_for_sentinel(self.timeouts.grace)? && !self.closed {
                warn!("shell prompt did not return after interrupt");
            }
        }
        loop {
            match self.transport.recv(Duration::ZERO)? {
                Recv::Data(bytes) => debug!(bytes = bytes.len(), "discarding stale output"),
                Recv::Idle => return Ok(()),
                Recv::Closed => {
                    self.closed = true;
                    return Ok(());
                }
            }
        }
    }

    fn wait_for_sentinel(&mut self, timeout: Duration) -> Result<bool> {
        self.stripper.reset();
        let deadline = Instant::now() + timeout;
        let mut seen: Vec<u8> = Vec::new();
        while let Some(left) = remaining_until(deadline) {
            match self.transport.recv(left.min(self.timeouts.read))? {
                Recv::Data(bytes) => {
                    seen.extend(self.stripper.feed(&bytes));
                    if find_subslice(&seen, SENTINEL.as_bytes()).is_some() {
                        return Ok(true);
                    }
                }
                Recv::Idle => {}
                Recv::Closed => {
                    self.closed = true;
                    return Ok(false);
                }
            }
        }
        Ok(false)
    }
}
