pub mod stt;
pub mod tts;

pub use stt::{HttpRecognizer, RecognitionBackend, SpeechRecognizer, TranscriptionResult};
pub use tts::{HttpSynthesizer, SpeechSynthesizer, SynthesisBackend, VoiceProfile};
