//! Orchestrator: the push-to-talk interaction cycle
//!
//! Press -> record -> release -> recognize -> generate -> synthesize ->
//! play -> idle. Input events arrive over a channel from the listener
//! thread; the main loop handles one event at a time and runs a whole
//! cycle before looking at the next one. Events that queued up while a
//! cycle was in flight are dropped, not replayed.
//!
//! Processing runs on a worker thread under a watchdog. Every backend call
//! inherits the watchdog deadline as its request timeout. When the ceiling
//! passes the worker is cancelled and joined, then the cycle takes the
//! fallback path: Error, the spoken fallback phrase, then back to Idle.

use super::config::Config;
use super::state::{ApplicationState, StateMachine, Transition, Trigger};
use crate::audio::buffer::AudioBuffer;
use crate::audio::capture::{AudioCapture, StartOutcome};
use crate::audio::device::{InputDevice, OutputDevice};
use crate::audio::playback::{AudioPlayback, PlaybackOutcome};
use crate::audio::preprocessor::StreamFormat;
use crate::component::{ComponentError, ErrorClass};
use crate::input::{spawn_listener, InputEvent, InputSource};
use crate::llm::generator::ResponseGenerator;
use crate::speech::stt::{HttpRecognizer, SpeechRecognizer};
use crate::speech::tts::{HttpSynthesizer, SpeechSynthesizer};
use crate::utils::perf::{CycleCounters, PerformanceStats};
use crate::utils::retry::{CancelToken, RetryPolicy};
use crate::{LyraError, Result};
use crossbeam_channel::{bounded, never, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;

/// How long a cancelled worker may take to wind down before it is reported
const CANCEL_GRACE: Duration = Duration::from_millis(250);

/// Window for the rolling latency statistics
const STATS_WINDOW: usize = 100;

/// Notifications for observers (front ends, tests)
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    StateChanged {
        from: ApplicationState,
        to: ApplicationState,
    },
    RecordingStarted { cycle: Uuid },
    /// Maximum recording duration reached; handled like a release
    RecordingLimitReached { cycle: Uuid },
    RecordingStopped { cycle: Uuid, duration: Duration },
    Transcribed {
        cycle: Uuid,
        text: String,
        confidence: f32,
    },
    Generated { cycle: Uuid, text: String },
    Speaking { cycle: Uuid, duration: Duration },
    PlaybackFinished {
        cycle: Uuid,
        outcome: PlaybackOutcome,
    },
    CycleFailed {
        cycle: Uuid,
        class: ErrorClass,
        message: String,
    },
    FallbackSpoken { cycle: Uuid },
    CycleFinished {
        cycle: Uuid,
        completed: bool,
        elapsed: Duration,
    },
    /// The input source will deliver no more events
    InputClosed,
    Shutdown,
}

/// Everything the orchestrator drives
pub struct Components {
    pub capture: AudioCapture,
    pub playback: AudioPlayback,
    pub recognizer: SpeechRecognizer,
    pub generator: ResponseGenerator,
    pub synthesizer: SpeechSynthesizer,
}

impl Components {
    /// Wire HTTP backends and the configured generator around two devices
    pub fn from_config(
        config: &Config,
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
    ) -> Result<Self> {
        let policy = RetryPolicy::from(&config.retry);
        let request_timeout = config.timeouts.request();

        let recognizer = SpeechRecognizer::new(
            Arc::new(HttpRecognizer::new(config.require_recognizer()?, request_timeout)?),
            config.voice.language_code.clone(),
            policy.clone(),
        );
        let synthesizer = SpeechSynthesizer::new(
            Arc::new(HttpSynthesizer::new(
                config.require_synthesizer()?,
                request_timeout,
                config.audio.playback_rate(),
            )?),
            config.voice.clone(),
            policy,
        );

        Ok(Self {
            capture: AudioCapture::new(input, &config.audio),
            playback: AudioPlayback::new(output, StreamFormat::new(config.audio.playback_rate(), 1)),
            recognizer,
            generator: ResponseGenerator::from_config(config)?,
            synthesizer,
        })
    }
}

/// Handle for observing and stopping a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    state: Arc<StateMachine>,
    counters: Arc<Mutex<CycleCounters>>,
    shutdown_tx: Sender<()>,
    event_rx: Receiver<OrchestratorEvent>,
}

impl OrchestratorHandle {
    pub fn current_state(&self) -> ApplicationState {
        self.state.current()
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.counters.lock().snapshot(self.state.current())
    }

    /// Recent transitions, oldest first
    pub fn state_trace(&self) -> Vec<Transition> {
        self.state.trace()
    }

    /// Ask the main loop to finish; an in-flight cycle completes first
    pub fn stop(&self) {
        match self.shutdown_tx.try_send(()) {
            Ok(()) => info!("Shutdown requested"),
            Err(_) => debug!("Shutdown already requested"),
        }
    }

    pub fn events(&self) -> Receiver<OrchestratorEvent> {
        self.event_rx.clone()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<OrchestratorEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Bounded event channel that drops the oldest event when full
#[derive(Clone)]
struct EventBus {
    tx: Sender<OrchestratorEvent>,
    rx: Receiver<OrchestratorEvent>,
}

impl EventBus {
    fn emit(&self, event: OrchestratorEvent) {
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(event);
        }
    }
}

/// Per-cycle view handed to the processing worker
#[derive(Clone)]
struct Observer {
    cycle: Uuid,
    events: EventBus,
    counters: Arc<Mutex<CycleCounters>>,
}

/// The three sequential network stages
struct Pipeline {
    recognizer: SpeechRecognizer,
    generator: ResponseGenerator,
    synthesizer: SpeechSynthesizer,
}

impl Pipeline {
    /// Stop at the first failing stage; later stages never see its output
    fn run(
        &self,
        audio: &AudioBuffer,
        cancel: &CancelToken,
        observer: &Observer,
    ) -> std::result::Result<AudioBuffer, ComponentError> {
        let recognition = self.recognizer.recognize(audio, cancel);
        observer.counters.lock().timings.recognition.record(recognition.elapsed);
        let transcript = recognition.into_result()?;
        if !cancel.is_cancelled() {
            observer.events.emit(OrchestratorEvent::Transcribed {
                cycle: observer.cycle,
                text: transcript.text.clone(),
                confidence: transcript.confidence,
            });
        }

        let generation = self.generator.generate(&transcript.text, cancel);
        observer.counters.lock().timings.generation.record(generation.elapsed);
        let reply = generation.into_result()?;
        if !cancel.is_cancelled() {
            observer.events.emit(OrchestratorEvent::Generated {
                cycle: observer.cycle,
                text: reply.text.clone(),
            });
        }

        let synthesis = self.synthesizer.synthesize(&reply.text, cancel);
        observer.counters.lock().timings.synthesis.record(synthesis.elapsed);
        synthesis.into_result()
    }
}

enum Watched<T> {
    Finished(T),
    TimedOut,
    /// The worker died without reporting
    Crashed,
}

/// Run `job` on a worker thread, cancelling it once `ceiling` passes
///
/// The worker's token carries the same deadline, so each backend call it
/// makes times out with it. The worker is joined before this returns:
/// nothing started for a cycle outlives that cycle.
fn run_watched<T, F>(stage: &'static str, ceiling: Duration, job: F) -> Watched<T>
where
    T: Send + 'static,
    F: FnOnce(CancelToken) -> T + Send + 'static,
{
    let cancel = match Instant::now().checked_add(ceiling) {
        Some(deadline) => CancelToken::with_deadline(deadline),
        None => CancelToken::new(),
    };
    let token = cancel.clone();
    let (tx, rx) = bounded(1);
    let span = Span::current();

    let spawned = thread::Builder::new()
        .name(format!("lyra-{}", stage))
        .spawn(move || {
            let _entered = span.enter();
            let _ = tx.send(job(token));
        });
    let worker = match spawned {
        Ok(worker) => worker,
        Err(e) => {
            error!(stage, "Failed to spawn worker: {}", e);
            return Watched::Crashed;
        }
    };

    let outcome = match rx.recv_timeout(ceiling) {
        Ok(value) => Watched::Finished(value),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stage, ceiling_ms = ceiling.as_millis() as u64, "Watchdog fired, cancelling");
            cancel.cancel();
            if rx.recv_timeout(CANCEL_GRACE).is_err() {
                warn!(stage, "Worker still busy after cancellation; waiting for its backend call");
            }
            Watched::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => Watched::Crashed,
    };

    if worker.join().is_err() {
        error!(stage, "Worker panicked");
    }
    outcome
}

struct Cycle {
    id: Uuid,
    span: Span,
    pressed_at: Instant,
}

/// Owner of the state machine and every component
pub struct Orchestrator {
    config: Arc<Config>,
    state: Arc<StateMachine>,
    counters: Arc<Mutex<CycleCounters>>,
    events: EventBus,
    shutdown_rx: Receiver<()>,
    capture: AudioCapture,
    playback: AudioPlayback,
    pipeline: Arc<Pipeline>,
    /// Synthesized once, on first use
    fallback_audio: Option<AudioBuffer>,
    cycle: Option<Cycle>,
}

impl Orchestrator {
    /// Create an orchestrator; call [`start`](Self::start) to run it
    pub fn new(config: Arc<Config>, components: Components) -> Result<(Self, OrchestratorHandle)> {
        config.validate()?;

        let state = Arc::new(StateMachine::default());
        let counters = Arc::new(Mutex::new(CycleCounters::new(STATS_WINDOW)));
        let (event_tx, event_rx) = bounded(config.orchestrator.event_buffer);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let handle = OrchestratorHandle {
            state: Arc::clone(&state),
            counters: Arc::clone(&counters),
            shutdown_tx,
            event_rx: event_rx.clone(),
        };

        let Components {
            capture,
            playback,
            recognizer,
            generator,
            synthesizer,
        } = components;

        let orchestrator = Self {
            config,
            state,
            counters,
            events: EventBus {
                tx: event_tx,
                rx: event_rx,
            },
            shutdown_rx,
            capture,
            playback,
            pipeline: Arc::new(Pipeline {
                recognizer,
                generator,
                synthesizer,
            }),
            fallback_audio: None,
            cycle: None,
        };

        Ok((orchestrator, handle))
    }

    /// Start the input listener and the main loop
    ///
    /// Returns the main loop's join handle. The listener thread ends by
    /// itself once the main loop has gone.
    pub fn start(self, input: Box<dyn InputSource>) -> Result<JoinHandle<()>> {
        let (input_tx, input_rx) = bounded(self.config.orchestrator.event_buffer);
        let (listener_stop_tx, listener_stop_rx) = bounded::<()>(1);
        spawn_listener(input, input_tx, listener_stop_rx)?;

        thread::Builder::new()
            .name("lyra-orchestrator".into())
            .spawn(move || {
                // Dropping this sender tells the listener to finish
                let _listener_stop = listener_stop_tx;
                self.run(input_rx);
            })
            .map_err(|e| LyraError::Channel(format!("Failed to spawn orchestrator: {}", e)))
    }

    fn run(mut self, input_rx: Receiver<InputEvent>) {
        info!(
            capture = %self.capture.device_name(),
            playback = %self.playback.device_name(),
            generator = self.pipeline.generator.backend_name(),
            "Orchestrator main loop starting"
        );

        let limit_rx = self.capture.limit_receiver();
        let shutdown_rx = self.shutdown_rx.clone();
        let mut input_rx = input_rx;

        loop {
            let mut input_closed = false;
            select! {
                recv(input_rx) -> msg => match msg {
                    Ok(event) => self.handle_input(event, &input_rx),
                    Err(_) => input_closed = true,
                },
                recv(limit_rx) -> _ => self.handle_limit(&input_rx),
                recv(shutdown_rx) -> _ => break,
            }
            if input_closed {
                info!("Input source finished");
                self.events.emit(OrchestratorEvent::InputClosed);
                input_rx = never();
            }
        }

        self.shutdown();
    }

    fn handle_input(&mut self, event: InputEvent, input_rx: &Receiver<InputEvent>) {
        match event {
            InputEvent::Press => {
                if self.fire(Trigger::Press) {
                    self.begin_recording();
                }
            }
            InputEvent::Release => {
                if self.fire(Trigger::Release) {
                    self.process_recording();
                    self.drop_queued_input(input_rx);
                }
            }
        }
    }

    fn handle_limit(&mut self, input_rx: &Receiver<InputEvent>) {
        if self.state.current() != ApplicationState::Recording {
            debug!("Stale recording limit event ignored");
            return;
        }
        if let Some(cycle) = &self.cycle {
            self.events
                .emit(OrchestratorEvent::RecordingLimitReached { cycle: cycle.id });
        }
        if self.fire(Trigger::Release) {
            self.process_recording();
            self.drop_queued_input(input_rx);
        }
    }

    /// Discard edges that arrived while a cycle was in flight
    fn drop_queued_input(&mut self, input_rx: &Receiver<InputEvent>) {
        let mut dropped = 0u64;
        while let Ok(event) = input_rx.try_recv() {
            debug!(%event, "Dropping input received while busy");
            dropped += 1;
        }
        if dropped > 0 {
            self.counters.lock().ignored_inputs += dropped;
        }
    }

    fn fire(&self, trigger: Trigger) -> bool {
        match self.state.fire(trigger) {
            Some(t) => {
                self.events.emit(OrchestratorEvent::StateChanged {
                    from: t.from,
                    to: t.to,
                });
                true
            }
            None => false,
        }
    }

    fn cycle_id(&self) -> Uuid {
        self.cycle.as_ref().map(|c| c.id).unwrap_or_else(Uuid::nil)
    }

    fn cycle_span(&self) -> Span {
        self.cycle.as_ref().map(|c| c.span.clone()).unwrap_or_else(Span::none)
    }

    fn begin_recording(&mut self) {
        let id = Uuid::new_v4();
        self.cycle = Some(Cycle {
            id,
            span: info_span!("cycle", cycle = %id),
            pressed_at: Instant::now(),
        });
        let span = self.cycle_span();
        let _entered = span.enter();

        match self.capture.start() {
            Ok(StartOutcome::Started) => {
                self.events.emit(OrchestratorEvent::RecordingStarted { cycle: id });
            }
            Ok(StartOutcome::AlreadyRecording) => {
                self.fail(ComponentError::new(
                    ErrorClass::InternalInvariant,
                    "capture was already recording while Idle",
                ));
            }
            Err(e) => self.fail(ComponentError::from(e)),
        }
    }

    fn process_recording(&mut self) {
        let span = self.cycle_span();
        let _entered = span.enter();
        let cycle = self.cycle_id();
        let released_at = Instant::now();

        let audio = match self.capture.stop() {
            Ok(audio) => audio,
            Err(e) => return self.fail(ComponentError::from(e)),
        };
        self.events.emit(OrchestratorEvent::RecordingStopped {
            cycle,
            duration: audio.duration(),
        });

        let pipeline = Arc::clone(&self.pipeline);
        let observer = Observer {
            cycle,
            events: self.events.clone(),
            counters: Arc::clone(&self.counters),
        };
        let ceiling = self.config.timeouts.processing();

        let reply_audio = match run_watched("processing", ceiling, move |cancel| {
            pipeline.run(&audio, &cancel, &observer)
        }) {
            Watched::Finished(Ok(audio)) => audio,
            Watched::Finished(Err(e)) => return self.fail(e),
            Watched::TimedOut => {
                self.counters.lock().processing_timeouts += 1;
                return self.fail(ComponentError::new(
                    ErrorClass::PermanentExternal,
                    format!("processing exceeded {:?}", ceiling),
                ));
            }
            Watched::Crashed => {
                return self.fail(ComponentError::new(
                    ErrorClass::InternalInvariant,
                    "processing worker ended without a result",
                ))
            }
        };

        if !self.fire(Trigger::ReplyReady) {
            return self.fail(ComponentError::from(LyraError::InvalidTransition {
                from: self.state.current().to_string(),
                to: ApplicationState::Speaking.to_string(),
            }));
        }

        let response_time = released_at.elapsed();
        self.counters.lock().timings.response.record(response_time);
        info!(response_ms = response_time.as_millis() as u64, "Speaking {}", reply_audio);
        self.events.emit(OrchestratorEvent::Speaking {
            cycle,
            duration: reply_audio.duration(),
        });

        let played = self
            .playback
            .play_to_completion(reply_audio, self.config.timeouts.playback());
        self.counters.lock().timings.playback.record(played.elapsed);

        match played.into_result() {
            Ok(outcome) => {
                if outcome == PlaybackOutcome::TimedOut {
                    self.counters.lock().playback_timeouts += 1;
                }
                self.events
                    .emit(OrchestratorEvent::PlaybackFinished { cycle, outcome });
                self.fire(Trigger::PlaybackFinished);
                self.counters.lock().cycles_completed += 1;
                self.finish_cycle(true);
            }
            Err(e) => self.fail(e),
        }
    }

    /// Route any failure through Error back to Idle
    fn fail(&mut self, err: ComponentError) {
        let span = self.cycle_span();
        let _entered = span.enter();
        let cycle = self.cycle_id();

        match err.class {
            ErrorClass::InternalInvariant => error!(class = %err.class, "Cycle failed: {}", err.message),
            ErrorClass::EmptyResult => warn!(class = %err.class, "empty result, cycle failed: {}", err.message),
            _ => warn!(class = %err.class, "Cycle failed: {}", err.message),
        }
        self.counters.lock().record_failure(err.class);
        self.events.emit(OrchestratorEvent::CycleFailed {
            cycle,
            class: err.class,
            message: err.message.clone(),
        });

        self.fire(Trigger::Fault);
        self.release_devices();

        if err.class.wants_fallback() {
            self.speak_fallback(cycle);
        }

        let delay = self.config.orchestrator.recovery_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.fire(Trigger::Recovered);
        self.finish_cycle(false);
    }

    fn release_devices(&mut self) {
        if self.capture.is_recording() {
            if let Err(e) = self.capture.stop() {
                warn!("Failed to release capture: {}", e);
            }
        }
        if self.playback.is_active() {
            if let Err(e) = self.playback.stop() {
                warn!("Failed to release playback: {}", e);
            }
        }
    }

    fn speak_fallback(&mut self, cycle: Uuid) {
        let audio = match &self.fallback_audio {
            Some(audio) => audio.clone(),
            None => match self.synthesize_fallback() {
                Some(audio) => {
                    self.fallback_audio = Some(audio.clone());
                    audio
                }
                None => return,
            },
        };

        match self
            .playback
            .play_to_completion(audio, self.config.timeouts.playback())
            .into_result()
        {
            Ok(outcome) => {
                let mut counters = self.counters.lock();
                counters.fallbacks_spoken += 1;
                if outcome == PlaybackOutcome::TimedOut {
                    counters.playback_timeouts += 1;
                }
                drop(counters);
                info!("Fallback phrase spoken");
                self.events.emit(OrchestratorEvent::FallbackSpoken { cycle });
            }
            Err(e) => warn!("Fallback playback failed: {}", e),
        }
    }

    fn synthesize_fallback(&self) -> Option<AudioBuffer> {
        let synthesizer = self.pipeline.synthesizer.clone();
        let phrase = self.config.orchestrator.fallback_phrase.clone();
        let ceiling = self.config.timeouts.processing();

        match run_watched("fallback", ceiling, move |cancel| {
            synthesizer.synthesize(&phrase, &cancel)
        }) {
            Watched::Finished(result) => match result.into_result() {
                Ok(audio) => {
                    debug!("Fallback phrase cached: {}", audio);
                    Some(audio)
                }
                Err(e) => {
                    warn!("Fallback synthesis failed, staying silent: {}", e);
                    None
                }
            },
            Watched::TimedOut => {
                warn!("Fallback synthesis timed out, staying silent");
                None
            }
            Watched::Crashed => {
                error!("Fallback synthesis worker ended without a result");
                None
            }
        }
    }

    fn finish_cycle(&mut self, completed: bool) {
        if let Some(cycle) = self.cycle.take() {
            let elapsed = cycle.pressed_at.elapsed();
            info!(cycle = %cycle.id, completed, elapsed_ms = elapsed.as_millis() as u64, "Cycle finished");
            self.events.emit(OrchestratorEvent::CycleFinished {
                cycle: cycle.id,
                completed,
                elapsed,
            });
        }
    }

    fn shutdown(&mut self) {
        info!("Orchestrator shutting down");
        if self.state.current() == ApplicationState::Recording {
            self.fire(Trigger::Fault);
            self.release_devices();
            self.fire(Trigger::Recovered);
            self.cycle = None;
        } else {
            self.release_devices();
        }

        let stats = self.counters.lock().snapshot(self.state.current());
        info!("Orchestrator stopped: {}", stats.summary());
        self.events.emit(OrchestratorEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ChannelSource, ScriptedSource};
    use crate::integration::config::AudioConfig;
    use crate::llm::generator::StubLanguageModel;
    use crate::speech::tts::VoiceProfile;
    use crate::testing::{ScriptedRecognizer, ScriptedSynthesizer, SimulatedSpeaker, SyntheticMicrophone};

    fn config() -> Arc<Config> {
        let mut config = Config::new(AudioConfig {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 512,
            max_recording_secs: 5.0,
            playback_sample_rate: None,
            input_device: None,
            output_device: None,
        });
        config.orchestrator.recovery_delay_ms = 0;
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        Arc::new(config)
    }

    fn components(config: &Config, transcript: &str) -> Components {
        let policy = RetryPolicy::from(&config.retry);
        Components {
            capture: AudioCapture::new(Box::new(SyntheticMicrophone::tone(16000, 1)), &config.audio),
            playback: AudioPlayback::new(Box::new(SimulatedSpeaker::new()), StreamFormat::new(16000, 1)),
            recognizer: SpeechRecognizer::new(
                Arc::new(ScriptedRecognizer::always(transcript)),
                "en-US",
                policy.clone(),
            ),
            generator: ResponseGenerator::new(Arc::new(StubLanguageModel::echo()), policy.clone()),
            synthesizer: SpeechSynthesizer::new(
                Arc::new(ScriptedSynthesizer::seconds(0.05)),
                VoiceProfile::default(),
                policy,
            ),
        }
    }

    fn wait_finished(handle: &OrchestratorHandle) -> bool {
        let events = handle.events();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(OrchestratorEvent::CycleFinished { completed, .. }) =
                events.recv_timeout(Duration::from_millis(50))
            {
                return completed;
            }
        }
        panic!("cycle did not finish");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut bad = (*config()).clone();
        bad.orchestrator.event_buffer = 0;
        let components = components(&bad, "hello");
        assert!(Orchestrator::new(Arc::new(bad), components).is_err());
    }

    #[test]
    fn test_one_cycle_with_echo_stub() {
        let config = config();
        let (orchestrator, handle) =
            Orchestrator::new(Arc::clone(&config), components(&config, "hello")).unwrap();
        let main = orchestrator
            .start(Box::new(ScriptedSource::new().hold(Duration::from_millis(100))))
            .unwrap();

        assert!(wait_finished(&handle));
        assert_eq!(handle.current_state(), ApplicationState::Idle);
        assert_eq!(handle.performance_stats().cycles_completed, 1);

        handle.stop();
        main.join().unwrap();
    }

    #[test]
    fn test_release_while_idle_ignored() {
        let config = config();
        let (orchestrator, handle) =
            Orchestrator::new(Arc::clone(&config), components(&config, "hello")).unwrap();
        let (source, controller) = ChannelSource::new();
        let main = orchestrator.start(Box::new(source)).unwrap();

        // The sink's debouncer drops this; nothing reaches the state machine
        controller.release();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.state_trace().is_empty());

        handle.stop();
        main.join().unwrap();
        assert_eq!(handle.current_state(), ApplicationState::Idle);
    }

    #[test]
    fn test_stop_while_recording_releases_microphone() {
        let config = config();
        let (orchestrator, handle) =
            Orchestrator::new(Arc::clone(&config), components(&config, "hello")).unwrap();
        let (source, controller) = ChannelSource::new();
        let main = orchestrator.start(Box::new(source)).unwrap();

        controller.press();
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.current_state() != ApplicationState::Recording && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.current_state(), ApplicationState::Recording);

        handle.stop();
        main.join().unwrap();
        assert_eq!(handle.current_state(), ApplicationState::Idle);
    }
}
