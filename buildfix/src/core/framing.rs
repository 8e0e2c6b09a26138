//! Response framing for one command written to an interactive shell.
//!
//! The shell prompt carries a reserved sentinel, so a command is complete once
//! the sentinel shows up in the (already control-stripped) output. The parser
//! also removes the terminal echo of the command and the prompt text that
//! precedes the sentinel.

/// Progress of a single command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Echo lines of the command may still arrive.
    AwaitingEcho,
    /// Receiving command output.
    Streaming,
    /// The prompt sentinel was seen.
    Complete,
    /// The caller gave up waiting and interrupted the command.
    Interrupted,
}

/// Accumulates cleaned output for one command and locates its end.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    sentinel: Vec<u8>,
    prompt_prefix: Vec<u8>,
    echo: Vec<String>,
    echo_matched: usize,
    body_start: usize,
    buf: Vec<u8>,
    sentinel_at: Option<usize>,
    state: ParseState,
}

impl ResponseParser {
    /// `prompt_prefix` is the prompt text printed right before the sentinel.
    pub fn new(command: &str, sentinel: &str, prompt_prefix: &str) -> Self {
        let echo: Vec<String> = command
            .lines()
            .map(normalize_line)
            .filter(|line| !line.is_empty())
            .collect();
        let state = if echo.is_empty() {
            ParseState::Streaming
        } else {
            ParseState::AwaitingEcho
        };
        Self {
            sentinel: sentinel.as_bytes().to_vec(),
            prompt_prefix: prompt_prefix.as_bytes().to_vec(),
            echo,
            echo_matched: 0,
            body_start: 0,
            buf: Vec::new(),
            sentinel_at: None,
            state,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    pub fn saw_sentinel(&self) -> bool {
        self.sentinel_at.is_some()
    }

    /// Append cleaned bytes and advance the state machine.
    ///
    /// Bytes arriving after the sentinel belong to the next prompt and are ignored.
    pub fn feed(&mut self, cleaned: &[u8]) -> ParseState {
        if self.sentinel_at.is_some() || cleaned.is_empty() {
            return self.state;
        }

        // A sentinel split across reads starts at most `len - 1` bytes back.
        let search_from = self
            .buf
            .len()
            .saturating_sub(self.sentinel.len().saturating_sub(1));
        self.buf.extend_from_slice(cleaned);
        if let Some(pos) = find_subslice(&self.buf[search_from..], &self.sentinel) {
            self.sentinel_at = Some(search_from + pos);
        }

        if self.state == ParseState::AwaitingEcho {
            self.consume_echo();
        }
        if self.sentinel_at.is_some() && self.state != ParseState::Interrupted {
            self.state = ParseState::Complete;
        }
        self.state
    }

    /// Mark the command as interrupted. Later feeds may still find the sentinel.
    pub fn interrupt(&mut self) {
        self.state = ParseState::Interrupted;
    }

    /// Output text with echo, prompt and sentinel removed.
    pub fn finish(self) -> String {
        let end = self.sentinel_at.unwrap_or(self.buf.len());
        let start = self.body_start.min(end);
        let mut body = &self.buf[start..end];
        if self.sentinel_at.is_some() && body.ends_with(&self.prompt_prefix) {
            body = &body[..body.len() - self.prompt_prefix.len()];
        }
        String::from_utf8_lossy(body).trim().to_string()
    }

    fn consume_echo(&mut self) {
        let limit = self.sentinel_at.unwrap_or(self.buf.len());
        while self.echo_matched < self.echo.len() {
            let rest = &self.buf[self.body_start..limit];
            let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
                if self.sentinel_at.is_some() {
                    self.state = ParseState::Streaming;
                }
                return;
            };
            let line = normalize_line(&String::from_utf8_lossy(&rest[..newline]));
            if line == self.echo[self.echo_matched] {
                self.echo_matched += 1;
                self.body_start += newline + 1;
            } else if line.is_empty() {
                self.body_start += newline + 1;
            } else {
                // No echo (pipe mode) or the echo already ended.
                self.state = ParseState::Streaming;
                return;
            }
        }
        self.state = ParseState::Streaming;
    }
}

/// Collapse runs of whitespace so terminal echo compares equal to the input.
fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
