pub mod context;
pub mod generator;
pub mod prompts;

pub use context::{ConversationContext, ConversationMessage, MessageRole};
pub use generator::{
    GenerationRequest, GenerationResult, HttpLanguageModel, LanguageModel, ResponseGenerator,
    StubBehavior, StubLanguageModel,
};
