//! Push-to-talk on a keyboard key
//!
//! Polls global key state with device_query. On Linux this needs X11;
//! under Wayland no key events are observed.

use super::{EventSink, InputEvent, InputSource};
use crate::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use device_query::{DeviceQuery, DeviceState, Keycode};
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL_MS: u64 = 20;

pub struct KeyboardSource {
    key: Keycode,
}

impl KeyboardSource {
    pub fn new(key: Keycode) -> Self {
        Self { key }
    }

    pub fn spacebar() -> Self {
        Self::new(Keycode::Space)
    }
}

impl InputSource for KeyboardSource {
    fn name(&self) -> String {
        format!("keyboard ({:?})", self.key)
    }

    fn run(&mut self, sink: &mut EventSink, shutdown: &Receiver<()>) -> Result<()> {
        let device_state = DeviceState::new();
        let mut was_down = false;

        loop {
            let down = device_state.get_keys().contains(&self.key);
            if down != was_down {
                debug!(key = ?self.key, down, "Key state changed");
                sink.emit(if down { InputEvent::Press } else { InputEvent::Release })?;
                was_down = down;
            }

            match shutdown.recv_timeout(Duration::from_millis(POLL_INTERVAL_MS)) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return Ok(()),
            }
        }
    }
}
