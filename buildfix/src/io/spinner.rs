//! Terminal spinner shown on stderr while the oracle is thinking.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};

/// Braille frames, one per tick.
pub const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
const FRAME_DELAY: Duration = Duration::from_millis(80);

/// Spins on a background thread until stopped or dropped.
///
/// A no-op when `plain` or stderr is not a terminal.
pub struct Spinner {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Start the spinner (hides cursor).
    pub fn start(message: &str, plain: bool) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        if plain || !io::stderr().is_terminal() {
            return Self {
                running,
                thread: None,
            };
        }

        let _ = execute!(io::stderr(), Hide);
        let flag = Arc::clone(&running);
        let message = message.to_string();
        let thread = thread::spawn(move || {
            let mut frame = 0usize;
            while flag.load(Ordering::Relaxed) {
                let _ = render_frame(&mut io::stderr(), FRAMES[frame % FRAMES.len()], &message);
                frame += 1;
                thread::sleep(FRAME_DELAY);
            }
        });
        Self {
            running,
            thread: Some(thread),
        }
    }

    pub fn is_active(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop the spinner (clears line, shows cursor). Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            let _ = clear_line(&mut io::stderr());
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_frame<W: Write>(out: &mut W, frame: char, message: &str) -> io::Result<()> {
    execute!(
        out,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        SetForegroundColor(Color::DarkGrey),
        Print(format!("{frame} ")),
        ResetColor,
        Print(message)
    )?;
    out.flush()
}

fn clear_line<W: Write>(out: &mut W) -> io::Result<()> {
    execute!(out, MoveToColumn(0), Clear(ClearType::CurrentLine), Show)
}
