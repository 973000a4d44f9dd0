use std::io::{self, Write};
use std::sync::Mutex;

use crossterm::QueueableCommand;
use crossterm::cursor::MoveToColumn;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};

use crate::app::{ProgressEvent, ProgressSink};

const BAR_WIDTH: usize = 24;

/// Single-line progress bar on stderr for interactive runs. Step events
/// redraw the bar in place; plain messages are printed on their own line.
pub struct ConsoleProgress {
    on_bar: Mutex<bool>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            on_bar: Mutex::new(false),
        }
    }

    /// Ends an in-place bar so that later output starts on a fresh line.
    pub fn finish(&self) {
        if let Ok(mut on_bar) = self.on_bar.lock() {
            if *on_bar {
                let _ = writeln!(io::stderr());
                *on_bar = false;
            }
        }
    }

    fn draw(&self, event: &ProgressEvent) -> io::Result<()> {
        let mut on_bar = self
            .on_bar
            .lock()
            .map_err(|_| io::Error::other("progress state poisoned"))?;
        let mut stderr = io::stderr();
        match event.step {
            Some((current, total)) => {
                stderr
                    .queue(MoveToColumn(0))?
                    .queue(Clear(ClearType::CurrentLine))?
                    .queue(SetForegroundColor(bar_color(current, total)))?
                    .queue(Print(progress_bar(current, total)))?
                    .queue(ResetColor)?
                    .queue(Print(format!(" {current}/{total} {}", event.message)))?;
                *on_bar = current < total;
                if !*on_bar {
                    stderr.queue(Print("\n"))?;
                }
            }
            None => {
                if *on_bar {
                    stderr.queue(Print("\n"))?;
                    *on_bar = false;
                }
                stderr
                    .queue(SetForegroundColor(Color::Yellow))?
                    .queue(Print("• "))?
                    .queue(ResetColor)?
                    .queue(Print(format!("{}\n", event.message)))?;
            }
        }
        stderr.flush()
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let _ = self.draw(&event);
    }
}

/// Yellow through the first third, blue through the second, then green.
pub fn bar_color(current: usize, total: usize) -> Color {
    let percent = if total == 0 { 100 } else { current * 100 / total };
    match percent {
        0..33 => Color::Yellow,
        33..66 => Color::Blue,
        _ => Color::Green,
    }
}

pub fn progress_bar(current: usize, total: usize) -> String {
    let filled = if total == 0 {
        BAR_WIDTH
    } else {
        (current.min(total) * BAR_WIDTH) / total
    };
    let mut out = String::from("[");
    for i in 0..BAR_WIDTH {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}
