//! Press/release event sources
//!
//! A source runs on its own listener thread and pushes [`InputEvent`]s into
//! an [`EventSink`]. The sink debounces: a second press while pressed, or a
//! second release while released, never reaches the orchestrator.

#[cfg(feature = "keyboard")]
pub mod keyboard;
pub mod scripted;
pub mod stdin;

#[cfg(feature = "keyboard")]
pub use keyboard::KeyboardSource;
pub use scripted::{ChannelSource, InputController, ScriptStep, ScriptedSource};
pub use stdin::StdinSource;

use crate::{LyraError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputEvent {
    Press,
    Release,
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputEvent::Press => f.write_str("press"),
            InputEvent::Release => f.write_str("release"),
        }
    }
}

/// Debouncing front of the channel into the orchestrator
pub struct EventSink {
    tx: Sender<InputEvent>,
    pressed: bool,
    suppressed: u64,
}

impl EventSink {
    pub fn new(tx: Sender<InputEvent>) -> Self {
        Self {
            tx,
            pressed: false,
            suppressed: 0,
        }
    }

    /// Forward `event` unless it repeats the current edge
    ///
    /// Returns `Ok(false)` for a suppressed duplicate and an error once the
    /// orchestrator has gone away.
    pub fn emit(&mut self, event: InputEvent) -> Result<bool> {
        let now_pressed = event == InputEvent::Press;
        if now_pressed == self.pressed {
            self.suppressed += 1;
            debug!(%event, "Duplicate input edge suppressed");
            return Ok(false);
        }

        self.tx
            .send(event)
            .map_err(|_| LyraError::Channel("orchestrator input channel closed".into()))?;
        self.pressed = now_pressed;
        Ok(true)
    }

    pub fn press(&mut self) -> Result<bool> {
        self.emit(InputEvent::Press)
    }

    pub fn release(&mut self) -> Result<bool> {
        self.emit(InputEvent::Release)
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Number of duplicate edges dropped so far
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}

/// Anything that can tell the orchestrator the control went down or up
pub trait InputSource: Send {
    fn name(&self) -> String;

    /// Deliver events until the source is exhausted or `shutdown` fires
    fn run(&mut self, sink: &mut EventSink, shutdown: &Receiver<()>) -> Result<()>;
}

/// Run `source` on a dedicated listener thread
pub fn spawn_listener(
    mut source: Box<dyn InputSource>,
    tx: Sender<InputEvent>,
    shutdown: Receiver<()>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("lyra-input".into())
        .spawn(move || {
            let name = source.name();
            info!(source = %name, "Input listener started");
            let mut sink = EventSink::new(tx);
            match source.run(&mut sink, &shutdown) {
                Ok(()) => info!(source = %name, "Input listener finished"),
                Err(LyraError::Channel(_)) => debug!(source = %name, "Orchestrator gone, listener exiting"),
                Err(e) => warn!(source = %name, "Input source failed: {}", e),
            }
        })
        .map_err(|e| LyraError::Channel(format!("Failed to spawn input listener: {}", e)))
}
