use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lyra::audio::{AudioCapture, AudioPlayback, InputDevice, OutputDevice, PlaybackOutcome, StreamFormat};
use lyra::input::{InputSource, StdinSource};
use lyra::integration::{Components, Config, Orchestrator, OrchestratorEvent};
use lyra::speech::{HttpSynthesizer, SpeechSynthesizer};
use lyra::utils::{CancelToken, RetryPolicy};
use lyra::LyraError;

/// Lyra - push-to-talk voice coach
#[derive(Parser)]
#[command(name = "lyra", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "LYRA_CONFIG", default_value = "lyra.toml")]
    config: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coaching device (default)
    Run {
        /// Where press/release events come from
        #[arg(short, long, value_enum, default_value_t = InputKind::Stdin)]
        input: InputKind,
    },
    /// Record from the microphone, then play the recording back
    TestMic {
        /// Seconds to record
        #[arg(short, long, default_value = "3")]
        duration: f64,
        /// Also write the recording to this WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Play a WAV file through the configured speaker
    Play { file: PathBuf },
    /// Synthesize text and play it
    Say {
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List audio devices
    Devices,
    /// Validate the configuration file and exit
    Check,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputKind {
    /// Enter toggles talking
    Stdin,
    /// Hold the spacebar (needs the `keyboard` feature)
    Keyboard,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "lyra=debug,info",
        1 => "lyra=trace,info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            if let Some(lyra) = e.downcast_ref::<LyraError>() {
                eprintln!("{}", lyra.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::Devices) = cli.command {
        return list_devices();
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run {
        input: InputKind::Stdin,
    }) {
        Command::Run { input } => run_device(config, input),
        Command::TestMic { duration, save } => test_mic(&config, duration, save),
        Command::Play { file } => play_file(&config, file),
        Command::Say { text } => say(&config, &text),
        Command::Check => {
            info!(
                sample_rate = config.audio.sample_rate,
                channels = config.audio.channels,
                recognizer = config.recognizer.is_some(),
                synthesizer = config.synthesizer.is_some(),
                "Configuration OK"
            );
            Ok(())
        }
        Command::Devices => list_devices(),
    }
}

fn run_device(config: Config, input: InputKind) -> anyhow::Result<()> {
    let (mic, speaker) = open_devices(&config)?;
    let components = Components::from_config(&config, mic, speaker)?;
    let (orchestrator, handle) = Orchestrator::new(Arc::new(config), components)?;

    let source: Box<dyn InputSource> = match input {
        InputKind::Stdin => Box::new(StdinSource::new()),
        InputKind::Keyboard => keyboard_source()?,
    };
    let main_loop = orchestrator.start(source)?;

    for event in handle.events().iter() {
        match event {
            OrchestratorEvent::Transcribed { text, .. } => println!("You:   {}", text),
            OrchestratorEvent::Generated { text, .. } => println!("Coach: {}", text),
            OrchestratorEvent::CycleFailed { class, message, .. } => {
                println!("({}: {})", class, message)
            }
            OrchestratorEvent::InputClosed => handle.stop(),
            OrchestratorEvent::Shutdown => break,
            _ => {}
        }
    }

    main_loop
        .join()
        .map_err(|_| anyhow!("orchestrator thread panicked"))?;
    println!("{}", handle.performance_stats().summary());
    Ok(())
}

fn test_mic(config: &Config, seconds: f64, save: Option<PathBuf>) -> anyhow::Result<()> {
    let hold = match Duration::try_from_secs_f64(seconds) {
        Ok(hold) if seconds > 0.0 => hold,
        _ => bail!("duration must be a positive number of seconds"),
    };
    let (mic, speaker) = open_devices(config)?;
    let mut capture = AudioCapture::new(mic, &config.audio);

    println!("Recording for {:.1}s...", seconds);
    capture.start()?;
    std::thread::sleep(hold);
    let recording = capture.stop()?;
    println!("Captured {}", recording);

    if let Some(path) = save {
        lyra::audio::write_wav(&path, &recording)?;
        println!("Saved to {}", path.display());
    }

    let mut playback = AudioPlayback::new(speaker, StreamFormat::of(&recording));
    report_playback(playback.play_and_wait(recording, config.timeouts.playback())?);
    Ok(())
}

fn play_file(config: &Config, file: PathBuf) -> anyhow::Result<()> {
    let (_, speaker) = open_devices(config)?;
    let mut playback = AudioPlayback::new(
        speaker,
        StreamFormat::new(config.audio.playback_rate(), 1),
    );
    report_playback(playback.play_and_wait(file, config.timeouts.playback())?);
    Ok(())
}

fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let backend = HttpSynthesizer::new(
        config.require_synthesizer()?,
        config.timeouts.request(),
        config.audio.playback_rate(),
    )?;
    let synthesizer = SpeechSynthesizer::new(
        Arc::new(backend),
        config.voice.clone(),
        RetryPolicy::from(&config.retry),
    );

    let result = synthesizer.synthesize(text, &CancelToken::new());
    info!(elapsed_ms = result.elapsed.as_millis() as u64, attempts = result.attempts, "synthesis done");
    let audio = result.into_result().map_err(|e| anyhow!("synthesis failed: {}", e))?;

    let (_, speaker) = open_devices(config)?;
    let mut playback = AudioPlayback::new(speaker, StreamFormat::of(&audio));
    report_playback(playback.play_and_wait(audio, config.timeouts.playback())?);
    Ok(())
}

fn report_playback(outcome: PlaybackOutcome) {
    match outcome {
        PlaybackOutcome::Completed => println!("Playback complete"),
        PlaybackOutcome::TimedOut => warn!("Playback hit the timeout and was stopped"),
    }
}

#[cfg(feature = "audio-io")]
fn open_devices(config: &Config) -> anyhow::Result<(Box<dyn InputDevice>, Box<dyn OutputDevice>)> {
    let mic = lyra::audio::CpalMicrophone::new(config.audio.input_device.as_deref())?;
    let speaker = lyra::audio::CpalSpeaker::new(config.audio.output_device.as_deref())?;
    Ok((Box::new(mic), Box::new(speaker)))
}

#[cfg(not(feature = "audio-io"))]
fn open_devices(_config: &Config) -> anyhow::Result<(Box<dyn InputDevice>, Box<dyn OutputDevice>)> {
    bail!("lyra was built without the `audio-io` feature")
}

#[cfg(feature = "audio-io")]
fn list_devices() -> anyhow::Result<()> {
    for device in lyra::audio::list_devices()? {
        println!("{}", device);
    }
    Ok(())
}

#[cfg(not(feature = "audio-io"))]
fn list_devices() -> anyhow::Result<()> {
    bail!("lyra was built without the `audio-io` feature")
}

#[cfg(feature = "keyboard")]
fn keyboard_source() -> anyhow::Result<Box<dyn InputSource>> {
    Ok(Box::new(lyra::input::KeyboardSource::spacebar()))
}

#[cfg(not(feature = "keyboard"))]
fn keyboard_source() -> anyhow::Result<Box<dyn InputSource>> {
    bail!("keyboard input needs the `keyboard` feature")
}
