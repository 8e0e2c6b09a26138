//! Incremental removal of terminal control sequences from shell output.
//!
//! Interactive shells attached to a pty emit colour codes, title updates
//! (OSC) and carriage returns. These must be removed before searching for the
//! prompt sentinel, and a sequence may be split across two reads, so the
//! stripper carries its state between calls to [`AnsiStripper::feed`].

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    /// Saw `ESC`, waiting for the sequence introducer or final byte.
    Escape,
    /// Inside `ESC [ ... final`.
    Csi,
    /// Inside `ESC ] ... (BEL | ESC \)`.
    Osc,
    /// Saw `ESC` inside an OSC string.
    OscEscape,
}

/// Byte-level state machine that drops control sequences.
///
/// Kept: printable bytes, `\n`, `\t` and every byte `>= 0x80` (UTF-8 payload).
/// Dropped: CSI and OSC sequences, two-byte escapes, `\r` and the remaining C0
/// controls.
#[derive(Debug, Clone, Default)]
pub struct AnsiStripper {
    state: State,
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any partially consumed sequence.
    pub fn reset(&mut self) {
        self.state = State::Ground;
    }

    /// Strip `input`, returning the bytes that survive.
    pub fn feed(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        for &byte in input {
            self.state = match self.state {
                State::Ground => match byte {
                    ESC => State::Escape,
                    b'\n' | b'\t' => {
                        out.push(byte);
                        State::Ground
                    }
                    0x00..=0x1f | 0x7f => State::Ground,
                    _ => {
                        out.push(byte);
                        State::Ground
                    }
                },
                State::Escape => match byte {
                    b'[' => State::Csi,
                    b']' => State::Osc,
                    // Intermediate bytes (e.g. charset designation `ESC ( B`).
                    0x20..=0x2f => State::Escape,
                    _ => State::Ground,
                },
                State::Csi => match byte {
                    0x40..=0x7e => State::Ground,
                    _ => State::Csi,
                },
                State::Osc => match byte {
                    BEL => State::Ground,
                    ESC => State::OscEscape,
                    _ => State::Osc,
                },
                State::OscEscape => match byte {
                    b'\\' => State::Ground,
                    _ => State::Osc,
                },
            };
        }
        out
    }
}

/// One-shot helper for complete buffers.
pub fn strip_ansi(input: &str) -> String {
    let cleaned = AnsiStripper::new().feed(input.as_bytes());
    String::from_utf8_lossy(&cleaned).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_colour_codes_and_carriage_returns() {
        let raw = "\x1b[1;31mBUILD FAILED\x1b[0m in 3s\r\n";
        assert_eq!(strip_ansi(raw), "BUILD FAILED in 3s\n");
    }

    #[test]
    fn removes_osc_title_with_bel_and_st_terminators() {
        let raw = "\x1b]0;root@box: /project\x07$ \x1b]2;other\x1b\\done";
        assert_eq!(strip_ansi(raw), "$ done");
    }

    #[test]
    fn handles_sequence_split_across_feeds() {
        let mut stripper = AnsiStripper::new();
        let mut out = stripper.feed(b"abc\x1b[3");
        out.extend(stripper.feed(b"2mdef\x1b"));
        out.extend(stripper.feed(b"[0mghi"));
        assert_eq!(String::from_utf8(out).expect("utf8"), "abcdefghi");
    }

    #[test]
    fn keeps_utf8_and_tabs() {
        assert_eq!(strip_ansi("caf\u{e9}\tok\x08"), "caf\u{e9}\tok");
    }

    #[test]
    fn charset_designation_is_dropped() {
        assert_eq!(strip_ansi("\x1b(Bplain"), "plain");
    }
}
