//! Sources driven by code rather than hardware

use super::{EventSink, InputEvent, InputSource};
use crate::Result;
use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    Emit(InputEvent),
    Wait(Duration),
}

/// Plays back a fixed list of edges and pauses
#[derive(Clone, Debug, Default)]
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(mut self) -> Self {
        self.steps.push(ScriptStep::Emit(InputEvent::Press));
        self
    }

    pub fn release(mut self) -> Self {
        self.steps.push(ScriptStep::Emit(InputEvent::Release));
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Wait(duration));
        self
    }

    /// Press, hold for `duration`, release
    pub fn hold(self, duration: Duration) -> Self {
        self.press().wait(duration).release()
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

impl InputSource for ScriptedSource {
    fn name(&self) -> String {
        format!("script ({} steps)", self.steps.len())
    }

    fn run(&mut self, sink: &mut EventSink, shutdown: &Receiver<()>) -> Result<()> {
        for step in &self.steps {
            match *step {
                ScriptStep::Emit(event) => {
                    sink.emit(event)?;
                }
                ScriptStep::Wait(duration) => match shutdown.recv_timeout(duration) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return Ok(()),
                },
            }
        }
        Ok(())
    }
}

/// Source fed live from an [`InputController`], e.g. by a test
pub struct ChannelSource {
    rx: Receiver<InputEvent>,
}

/// Sending half of a [`ChannelSource`]; edges are not debounced here
#[derive(Clone)]
pub struct InputController {
    tx: Sender<InputEvent>,
}

impl ChannelSource {
    pub fn new() -> (Self, InputController) {
        let (tx, rx) = unbounded();
        (Self { rx }, InputController { tx })
    }
}

impl InputController {
    pub fn send(&self, event: InputEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn press(&self) -> bool {
        self.send(InputEvent::Press)
    }

    pub fn release(&self) -> bool {
        self.send(InputEvent::Release)
    }
}

impl InputSource for ChannelSource {
    fn name(&self) -> String {
        "channel".to_string()
    }

    fn run(&mut self, sink: &mut EventSink, shutdown: &Receiver<()>) -> Result<()> {
        loop {
            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(event) => {
                        sink.emit(event)?;
                    }
                    // Every controller dropped
                    Err(_) => return Ok(()),
                },
                recv(shutdown) -> _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_hold_builds_three_steps() {
        let script = ScriptedSource::new().hold(Duration::from_millis(20));
        assert_eq!(
            script.steps(),
            &[
                ScriptStep::Emit(InputEvent::Press),
                ScriptStep::Wait(Duration::from_millis(20)),
                ScriptStep::Emit(InputEvent::Release),
            ]
        );
    }

    #[test]
    fn test_shutdown_interrupts_wait() {
        let (tx, rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let mut sink = EventSink::new(tx);
        let mut script = ScriptedSource::new().press().wait(Duration::from_secs(30)).release();

        shutdown_tx.send(()).unwrap();
        let started = std::time::Instant::now();
        script.run(&mut sink, &shutdown_rx).unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![InputEvent::Press]);
    }

    #[test]
    fn test_channel_source_debounces_and_ends() {
        let (tx, rx) = unbounded();
        let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (mut source, controller) = ChannelSource::new();

        controller.press();
        controller.press();
        controller.release();
        drop(controller);

        let mut sink = EventSink::new(tx);
        source.run(&mut sink, &shutdown_rx).unwrap();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![InputEvent::Press, InputEvent::Release]
        );
    }
}
