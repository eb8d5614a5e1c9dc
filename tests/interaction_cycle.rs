//! End-to-end interaction cycles
//!
//! Each test drives a full orchestrator with simulated devices and scripted
//! backends, then checks the state trace, the played audio and the stats.

use lyra::audio::{AudioCapture, AudioPlayback, PlaybackOutcome, StreamFormat};
use lyra::component::ErrorClass;
use lyra::input::{ChannelSource, InputController, ScriptedSource};
use lyra::integration::config::{AudioConfig, DEFAULT_FALLBACK_PHRASE};
use lyra::integration::{
    ApplicationState, Components, Config, Orchestrator, OrchestratorEvent, OrchestratorHandle,
};
use lyra::llm::{LanguageModel, ResponseGenerator, StubLanguageModel};
use lyra::speech::{SpeechRecognizer, SpeechSynthesizer, VoiceProfile};
use lyra::testing::{
    FailingLanguageModel, HangingLanguageModel, ScriptedRecognizer, ScriptedSynthesizer,
    SimulatedSpeaker, SpeakerMonitor, SyntheticMicrophone,
};
use lyra::utils::RetryPolicy;
use lyra::LyraError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

fn base_config() -> Config {
    let mut config = Config::new(AudioConfig {
        sample_rate: 16000,
        channels: 1,
        chunk_size: 1024,
        max_recording_secs: 10.0,
        playback_sample_rate: None,
        input_device: None,
        output_device: None,
    });
    config.orchestrator.recovery_delay_ms = 10;
    config.retry.initial_delay_ms = 20;
    config.retry.max_delay_ms = 1000;
    config.timeouts.processing_secs = 5.0;
    config.timeouts.playback_secs = 10.0;
    config
}

struct Rig {
    handle: OrchestratorHandle,
    main_loop: JoinHandle<()>,
    monitor: SpeakerMonitor,
    synthesizer: Arc<ScriptedSynthesizer>,
}

impl Rig {
    fn start(
        config: Config,
        mic: SyntheticMicrophone,
        speaker: SimulatedSpeaker,
        recognizer: Arc<ScriptedRecognizer>,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<ScriptedSynthesizer>,
        input: Box<dyn lyra::input::InputSource>,
    ) -> Self {
        let policy = RetryPolicy::from(&config.retry);
        let monitor = speaker.monitor();
        let components = Components {
            capture: AudioCapture::new(Box::new(mic), &config.audio),
            playback: AudioPlayback::new(Box::new(speaker), StreamFormat::new(16000, 1)),
            recognizer: SpeechRecognizer::new(recognizer, "en-US", policy.clone()),
            generator: ResponseGenerator::new(model, policy.clone()),
            synthesizer: SpeechSynthesizer::new(synthesizer.clone(), VoiceProfile::default(), policy),
        };

        let (orchestrator, handle) = Orchestrator::new(Arc::new(config), components).unwrap();
        let main_loop = orchestrator.start(input).unwrap();
        Self {
            handle,
            main_loop,
            monitor,
            synthesizer,
        }
    }

    /// Collect events up to and including the next CycleFinished
    fn next_cycle(&self, timeout: Duration) -> Vec<OrchestratorEvent> {
        let events = self.handle.events();
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            if let Ok(event) = events.recv_timeout(Duration::from_millis(20)) {
                let finished = matches!(event, OrchestratorEvent::CycleFinished { .. });
                seen.push(event);
                if finished {
                    return seen;
                }
            }
        }
        panic!("no cycle finished within {:?}; saw {:?}", timeout, seen);
    }

    fn wait_for_state(&self, state: ApplicationState, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.handle.current_state() != state {
            assert!(Instant::now() < deadline, "never reached {}", state);
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn transitions(&self) -> Vec<(ApplicationState, ApplicationState)> {
        self.handle
            .state_trace()
            .into_iter()
            .map(|t| (t.from, t.to))
            .collect()
    }

    fn shutdown(self) {
        self.handle.stop();
        self.main_loop.join().unwrap();
    }
}

fn failed_class(events: &[OrchestratorEvent]) -> Option<ErrorClass> {
    events.iter().find_map(|e| match e {
        OrchestratorEvent::CycleFailed { class, .. } => Some(*class),
        _ => None,
    })
}

fn fallback_spoken(events: &[OrchestratorEvent]) -> bool {
    events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::FallbackSpoken { .. }))
}

fn hold(controller: &InputController, duration: Duration) {
    controller.press();
    std::thread::sleep(duration);
    controller.release();
}

use ApplicationState::*;

#[test]
fn test_silence_ends_with_spoken_fallback() {
    let recognizer = Arc::new(ScriptedRecognizer::always(""));
    let model = Arc::new(StubLanguageModel::fixed("should never be used"));
    let rig = Rig::start(
        base_config(),
        SyntheticMicrophone::silence(16000, 1),
        SimulatedSpeaker::new().with_speed(10.0),
        recognizer.clone(),
        model.clone(),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(ScriptedSource::new().hold(Duration::from_secs(2))),
    );

    let events = rig.next_cycle(Duration::from_secs(10));

    assert_eq!(failed_class(&events), Some(ErrorClass::EmptyResult));
    assert!(fallback_spoken(&events));
    assert_eq!(recognizer.calls(), 1);
    let heard = recognizer.last_audio().unwrap();
    assert!(heard.duration_secs() > 1.5, "recorded {}", heard);

    // Neither the generator nor synthesis saw the empty text
    assert!(model.requests().is_empty());
    assert_eq!(rig.synthesizer.requests(), vec![DEFAULT_FALLBACK_PHRASE.to_string()]);
    assert_eq!(rig.monitor.played().len(), 1);

    assert_eq!(
        rig.transitions(),
        vec![(Idle, Recording), (Recording, Processing), (Processing, Error), (Error, Idle)]
    );
    let stats = rig.handle.performance_stats();
    assert_eq!(stats.failures_of(ErrorClass::EmptyResult), 1);
    assert_eq!(stats.fallbacks_spoken, 1);
    assert_eq!(stats.cycles_completed, 0);
    rig.shutdown();
}

#[test]
fn test_stub_reply_is_spoken() {
    let model = Arc::new(StubLanguageModel::scripted([(
        "how do I lead a team",
        "Listen first, then decide",
    )]));
    let rig = Rig::start(
        base_config(),
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new().with_speed(20.0),
        Arc::new(ScriptedRecognizer::always("how do I lead a team")),
        model.clone(),
        Arc::new(ScriptedSynthesizer::seconds(3.0)),
        Box::new(ScriptedSource::new().hold(Duration::from_millis(300))),
    );

    let events = rig.next_cycle(Duration::from_secs(10));

    assert!(failed_class(&events).is_none(), "{:?}", events);
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestratorEvent::PlaybackFinished {
            outcome: PlaybackOutcome::Completed,
            ..
        }
    )));
    assert_eq!(model.requests()[0].text, "how do I lead a team");
    assert_eq!(
        rig.synthesizer.requests(),
        vec!["Listen first, then decide".to_string()]
    );

    let played = rig.monitor.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].duration(), Duration::from_secs(3));

    assert_eq!(
        rig.transitions(),
        vec![
            (Idle, Recording),
            (Recording, Processing),
            (Processing, Speaking),
            (Speaking, Idle)
        ]
    );
    let stats = rig.handle.performance_stats();
    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.response_times.len(), 1);
    rig.shutdown();
}

#[test]
fn test_transient_generator_retries_then_falls_back() {
    let mut config = base_config();
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 40;
    config.retry.backoff_factor = 2.0;

    let model = Arc::new(FailingLanguageModel::transient());
    let rig = Rig::start(
        config,
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new().with_speed(10.0),
        Arc::new(ScriptedRecognizer::always("how do I lead a team")),
        model.clone(),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(ScriptedSource::new().hold(Duration::from_millis(100))),
    );

    let events = rig.next_cycle(Duration::from_secs(10));

    assert_eq!(model.calls(), 3);
    let gaps = model.call_gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= Duration::from_millis(40), "{:?}", gaps);
    assert!(gaps[1] > gaps[0], "{:?}", gaps);

    assert_eq!(failed_class(&events), Some(ErrorClass::PermanentExternal));
    assert!(fallback_spoken(&events));
    assert_eq!(rig.handle.current_state(), Idle);
    rig.shutdown();
}

#[test]
fn test_processing_watchdog_bounds_the_cycle() {
    let mut config = base_config();
    config.timeouts.processing_secs = 0.5;

    let model = Arc::new(HangingLanguageModel::new(Duration::from_secs(30)));
    let rig = Rig::start(
        config,
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new().with_speed(10.0),
        Arc::new(ScriptedRecognizer::always("hello")),
        model.clone(),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(ScriptedSource::new().hold(Duration::from_millis(100))),
    );

    rig.wait_for_state(Processing, Duration::from_secs(5));
    let released = Instant::now();
    let events = rig.next_cycle(Duration::from_secs(10));
    let elapsed = released.elapsed();

    // ceiling + cancellation grace + fallback + recovery, with slack
    assert!(elapsed < Duration::from_millis(2000), "took {:?}", elapsed);
    assert!(elapsed >= Duration::from_millis(450), "took {:?}", elapsed);
    assert!(fallback_spoken(&events));
    assert_eq!(model.calls(), 1);

    let stats = rig.handle.performance_stats();
    assert_eq!(stats.processing_timeouts, 1);
    assert_eq!(rig.handle.current_state(), Idle);

    model.release();
    rig.shutdown();
}

#[test]
fn test_timed_out_backend_call_ends_with_its_cycle() {
    let mut config = base_config();
    config.timeouts.processing_secs = 0.3;

    let model = Arc::new(HangingLanguageModel::new(Duration::from_secs(3)));
    let (source, controller) = ChannelSource::new();
    let rig = Rig::start(
        config,
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new().with_speed(10.0),
        Arc::new(ScriptedRecognizer::always("hello")),
        model.clone(),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(source),
    );

    for _ in 0..2 {
        hold(&controller, Duration::from_millis(50));
        let events = rig.next_cycle(Duration::from_secs(10));

        // Nothing from the timed-out call is still running or reporting
        assert_eq!(model.in_flight(), 0);
        assert_eq!(rig.handle.current_state(), Idle);
        assert!(!events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::Generated { .. })));
        assert!(fallback_spoken(&events));
    }

    assert_eq!(model.calls(), 2);
    assert_eq!(model.peak_in_flight(), 1);
    assert_eq!(rig.handle.performance_stats().processing_timeouts, 2);
    rig.shutdown();
}

#[test]
fn test_playback_watchdog_releases_speaker() {
    let mut config = base_config();
    config.timeouts.playback_secs = 0.3;

    let (source, controller) = ChannelSource::new();
    let rig = Rig::start(
        config,
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new(),
        Arc::new(ScriptedRecognizer::always("tell me everything")),
        Arc::new(StubLanguageModel::fixed("A very long answer")),
        Arc::new(ScriptedSynthesizer::seconds(5.0)),
        Box::new(source),
    );

    hold(&controller, Duration::from_millis(100));
    let started = Instant::now();
    let events = rig.next_cycle(Duration::from_secs(10));

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestratorEvent::PlaybackFinished {
            outcome: PlaybackOutcome::TimedOut,
            ..
        }
    )));
    assert_eq!(rig.monitor.open_handles(), 0);
    assert_eq!(rig.handle.current_state(), Idle);

    let stats = rig.handle.performance_stats();
    assert_eq!(stats.playback_timeouts, 1);
    assert_eq!(stats.cycles_completed, 1);

    // The device is usable again
    hold(&controller, Duration::from_millis(100));
    rig.next_cycle(Duration::from_secs(10));
    assert_eq!(rig.monitor.played().len(), 2);
    assert_eq!(rig.monitor.open_handles(), 0);
    rig.shutdown();
}

#[test]
fn test_press_while_busy_is_ignored() {
    let (source, controller) = ChannelSource::new();
    let rig = Rig::start(
        base_config(),
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new(),
        Arc::new(ScriptedRecognizer::always("hello")),
        Arc::new(StubLanguageModel::echo()),
        Arc::new(ScriptedSynthesizer::seconds(1.0)),
        Box::new(source),
    );

    // Duplicate edges are debounced before the state machine
    controller.press();
    controller.press();
    rig.wait_for_state(Recording, Duration::from_secs(2));
    controller.release();
    controller.release();

    rig.wait_for_state(Speaking, Duration::from_secs(5));
    hold(&controller, Duration::from_millis(10));

    rig.next_cycle(Duration::from_secs(10));
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(
        rig.transitions(),
        vec![
            (Idle, Recording),
            (Recording, Processing),
            (Processing, Speaking),
            (Speaking, Idle)
        ]
    );
    assert_eq!(rig.handle.current_state(), Idle);
    assert_eq!(rig.handle.performance_stats().ignored_inputs, 2);
    rig.shutdown();
}

#[test]
fn test_recording_limit_acts_as_release() {
    let mut config = base_config();
    config.audio.max_recording_secs = 0.2;

    let recognizer = Arc::new(ScriptedRecognizer::always("hello"));
    let (source, controller) = ChannelSource::new();
    let rig = Rig::start(
        config,
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new().with_speed(10.0),
        recognizer.clone(),
        Arc::new(StubLanguageModel::echo()),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(source),
    );

    // Held down and never released
    controller.press();
    let events = rig.next_cycle(Duration::from_secs(10));

    assert!(events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::RecordingLimitReached { .. })));
    assert!(failed_class(&events).is_none(), "{:?}", events);
    let heard = recognizer.last_audio().unwrap();
    assert_eq!(heard.frames(), 3200);

    // The late release finds the device idle and changes nothing
    controller.release();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(rig.handle.current_state(), Idle);
    assert_eq!(rig.transitions().len(), 4);
    rig.shutdown();
}

#[test]
fn test_fallback_is_synthesized_once() {
    let (source, controller) = ChannelSource::new();
    let rig = Rig::start(
        base_config(),
        SyntheticMicrophone::tone(16000, 1),
        SimulatedSpeaker::new().with_speed(10.0),
        Arc::new(ScriptedRecognizer::always("   ")),
        Arc::new(StubLanguageModel::echo()),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(source),
    );

    for _ in 0..3 {
        hold(&controller, Duration::from_millis(50));
        let events = rig.next_cycle(Duration::from_secs(10));
        assert!(fallback_spoken(&events));
    }

    assert_eq!(rig.synthesizer.requests().len(), 1);
    assert_eq!(rig.monitor.played().len(), 3);
    assert_eq!(rig.handle.performance_stats().fallbacks_spoken, 3);
    rig.shutdown();
}

#[test]
fn test_missing_microphone_recovers_to_idle() {
    let (source, controller) = ChannelSource::new();
    let rig = Rig::start(
        base_config(),
        SyntheticMicrophone::unavailable(),
        SimulatedSpeaker::new().with_speed(10.0),
        Arc::new(ScriptedRecognizer::always("hello")),
        Arc::new(StubLanguageModel::echo()),
        Arc::new(ScriptedSynthesizer::seconds(0.5)),
        Box::new(source),
    );

    controller.press();
    let events = rig.next_cycle(Duration::from_secs(10));
    assert_eq!(failed_class(&events), Some(ErrorClass::LocalResource));
    assert!(fallback_spoken(&events));
    assert_eq!(rig.handle.current_state(), Idle);
    rig.shutdown();
}

#[test]
fn test_capture_double_stop() {
    let config = base_config();
    let mut capture = AudioCapture::new(Box::new(SyntheticMicrophone::tone(16000, 1)), &config.audio);

    capture.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert!(capture.stop().is_ok());
    assert!(matches!(capture.stop(), Err(LyraError::NothingToStop)));
}
