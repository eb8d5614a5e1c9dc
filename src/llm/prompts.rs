//! System prompts and canned phrases for the coach

/// Default system prompt for the coach
pub const COACH_SYSTEM_PROMPT: &str = r#"You are Lyra, a warm and encouraging leadership coach that people talk to through a small push-to-talk device. Your replies are converted to speech, so write the way you would talk.

## Guidelines

1. Start by showing you heard the question, in a few words
2. Give one or two concrete, practical ideas the listener can try this week
3. Keep the whole reply under 45 seconds when spoken aloud
4. No lists, markdown, URLs or emoji; plain sentences only
5. End with a short line of encouragement"#;

/// Reply template used by the echo stub
pub const ECHO_TEMPLATE: &str = "Mock response - You said: {text}.";

/// Echo reply for development without a language model
pub fn echo_response(user_text: &str) -> String {
    ECHO_TEMPLATE.replace("{text}", user_text.trim())
}

/// Build the system prompt, optionally replacing the default coach prompt
pub fn build_system_prompt(custom: Option<&str>, listener_name: Option<&str>) -> String {
    let mut prompt = custom.unwrap_or(COACH_SYSTEM_PROMPT).to_string();

    if let Some(name) = listener_name {
        prompt.push_str(&format!("\n\nYou are speaking with {}. Use their name now and then.", name));
    }

    prompt
}

/// Frame prior turns for inclusion in a request
pub fn with_history(history: &str) -> String {
    format!("Recent conversation:\n{}", history)
}
