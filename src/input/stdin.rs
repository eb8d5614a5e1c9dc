//! Terminal fallback: Enter toggles between press and release

use super::{EventSink, InputEvent, InputSource};
use crate::Result;
use crossbeam_channel::Receiver;
use std::io::{BufRead, BufReader, Read};
use tracing::info;

/// Reads lines from a reader (stdin by default)
///
/// Each empty line flips the control; `q` ends the source. Blocking reads
/// cannot observe shutdown, so the listener thread is left to end with the
/// process.
pub struct StdinSource<R = std::io::Stdin> {
    reader: BufReader<R>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self::from_reader(std::io::stdin())
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read> StdinSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }
}

impl<R: Read + Send> InputSource for StdinSource<R> {
    fn name(&self) -> String {
        "stdin".to_string()
    }

    fn run(&mut self, sink: &mut EventSink, shutdown: &Receiver<()>) -> Result<()> {
        info!("Press Enter to start talking, Enter again to stop, q to quit");

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if shutdown.try_recv().is_ok() {
                return Ok(());
            }

            match line.trim() {
                "q" | "quit" => return Ok(()),
                _ => {
                    let next = if sink.is_pressed() {
                        InputEvent::Release
                    } else {
                        InputEvent::Press
                    };
                    sink.emit(next)?;
                }
            }
        }
    }
}
