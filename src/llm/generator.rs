//! Response generation
//!
//! [`ResponseGenerator`] is the only wrapper with a pluggable backend. The
//! backend is chosen once from configuration: a remote chat-completions
//! service or a deterministic [`StubLanguageModel`].

use super::context::{ConversationContext, ConversationMessage};
use super::prompts::{build_system_prompt, echo_response, with_history};
use crate::component::{BackendError, ComponentError, ComponentResult};
use crate::integration::config::{
    Config, GeneratorConfig, RemoteGeneratorConfig, StubGeneratorConfig, StubMode,
};
use crate::utils::retry::{call_with_retry, within_budget, CancelToken, RetryPolicy};
use crate::{LyraError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transcribed text plus optional prior-turn context
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub text: String,
    pub context: Option<String>,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    /// Blank output; never reaches synthesis
    pub empty: bool,
}

impl GenerationResult {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        let empty = text.is_empty();
        Self { text, empty }
    }
}

/// A language model backend
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// `timeout` is the caller's remaining budget; the call must not outlive it
    fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Option<Duration>,
    ) -> std::result::Result<String, BackendError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ConversationMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions backend
pub struct HttpLanguageModel {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
    request_timeout: Duration,
}

impl HttpLanguageModel {
    pub fn new(config: &RemoteGeneratorConfig, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LyraError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.endpoint_config().resolve_api_key()?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: build_system_prompt(
                config.system_prompt.as_deref(),
                config.listener_name.as_deref(),
            ),
            request_timeout,
        })
    }

    fn messages(&self, request: &GenerationRequest) -> Vec<ConversationMessage> {
        let mut messages = vec![ConversationMessage::system(self.system_prompt.clone())];
        if let Some(context) = &request.context {
            messages.push(ConversationMessage::system(with_history(context)));
        }
        messages.push(ConversationMessage::user(request.text.clone()));
        messages
    }
}

impl LanguageModel for HttpLanguageModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Option<Duration>,
    ) -> std::result::Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: self.messages(request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut http = self
            .client
            .post(&self.endpoint)
            .timeout(within_budget(self.request_timeout, timeout))
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| BackendError::Malformed("response has no choices".into()))
    }
}

/// How the stub answers
#[derive(Clone, Debug)]
pub enum StubBehavior {
    /// Same text for every input
    Fixed(String),
    /// "Mock response - You said: ..."
    Echo,
    /// Exact-input lookup; unknown input yields an empty reply
    Scripted(HashMap<String, String>),
}

/// Deterministic, cost-free language model
pub struct StubLanguageModel {
    behavior: StubBehavior,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl StubLanguageModel {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(StubBehavior::Fixed(text.into()))
    }

    pub fn echo() -> Self {
        Self::new(StubBehavior::Echo)
    }

    pub fn scripted<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(StubBehavior::Scripted(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }

    pub fn from_config(config: &StubGeneratorConfig) -> Self {
        match config.mode {
            StubMode::Fixed => Self::fixed(config.text.clone().unwrap_or_default()),
            StubMode::Echo => Self::echo(),
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }
}

impl LanguageModel for StubLanguageModel {
    fn name(&self) -> &str {
        "stub"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        _timeout: Option<Duration>,
    ) -> std::result::Result<String, BackendError> {
        self.calls.lock().push(request.clone());
        Ok(match &self.behavior {
            StubBehavior::Fixed(text) => text.clone(),
            StubBehavior::Echo => echo_response(&request.text),
            StubBehavior::Scripted(replies) => replies
                .get(request.text.trim())
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// Retrying wrapper around a language model, with optional memory
pub struct ResponseGenerator {
    backend: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    context: Option<Mutex<ConversationContext>>,
}

impl ResponseGenerator {
    pub fn new(backend: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            context: None,
        }
    }

    /// Keep the last `max_turns` exchanges and send them with each request
    pub fn with_context(mut self, max_turns: usize) -> Self {
        self.context = Some(Mutex::new(ConversationContext::new(max_turns)));
        self
    }

    /// Build the backend selected in configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn LanguageModel> = match &config.generator {
            GeneratorConfig::Remote(remote) => {
                info!(model = %remote.model, endpoint = %remote.endpoint, "Using remote language model");
                Arc::new(HttpLanguageModel::new(remote, config.timeouts.request())?)
            }
            GeneratorConfig::Stub(stub) => {
                warn!(mode = ?stub.mode, "Using stub language model");
                Arc::new(StubLanguageModel::from_config(stub))
            }
        };

        let generator = Self::new(backend, RetryPolicy::from(&config.retry));
        Ok(if config.orchestrator.conversation_context {
            generator.with_context(config.orchestrator.max_context_turns)
        } else {
            generator
        })
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Generate a reply to `text`
    pub fn generate(&self, text: &str, cancel: &CancelToken) -> ComponentResult<GenerationResult> {
        if text.trim().is_empty() {
            warn!(stage = "generation", "empty result: refusing to generate from blank input");
            let mut result = ComponentResult::failure(ComponentError::empty("generation input"), Duration::ZERO);
            result.attempts = 0;
            return result;
        }

        let request = GenerationRequest {
            text: text.trim().to_string(),
            context: self.context.as_ref().and_then(|c| c.lock().render()),
        };

        let started = Instant::now();
        let result = call_with_retry("generation", &self.policy, cancel, |attempt, budget| {
            debug!(backend = self.backend.name(), attempt, "generating");
            self.backend.generate(&request, budget)
        })
        .map(|text| GenerationResult::new(text))
        .and_then_check(|r| r.empty.then(|| ComponentError::empty("generated text")));

        match &result.outcome {
            Ok(reply) => {
                info!(
                    stage = "generation",
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    attempts = result.attempts,
                    "generated {} chars",
                    reply.text.len()
                );
                // A reply that lands after cancellation belongs to a failed cycle
                if let Some(context) = self.context.as_ref().filter(|_| !cancel.is_cancelled()) {
                    context.lock().record_turn(request.text.clone(), reply.text.clone());
                }
            }
            Err(e) if e.class == crate::component::ErrorClass::EmptyResult => {
                warn!(stage = "generation", "empty result: {}", e.message)
            }
            Err(e) => warn!(stage = "generation", class = %e.class, "generation failed: {}", e.message),
        }
        result
    }

    /// Forget remembered turns
    pub fn clear_context(&self) {
        if let Some(context) = &self.context {
            context.lock().clear();
        }
    }

    pub fn context_turns(&self) -> usize {
        self.context.as_ref().map(|c| c.lock().turn_count()).unwrap_or(0)
    }
}
