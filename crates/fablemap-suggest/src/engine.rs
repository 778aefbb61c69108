use std::time::Duration;

use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use tracing::debug;

use fablemap_core::AiSettings;

use crate::SuggestError;

/// Upper bound on one generation round trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn map_backend(provider: &str) -> Result<LLMBackend, SuggestError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(SuggestError::UnknownProvider(other.to_string())),
    }
}

/// Send one system + user exchange to the configured backend and return the reply text.
pub async fn generate(settings: &AiSettings, system: &str, user_msg: &str) -> Result<String, SuggestError> {
    let backend = map_backend(&settings.provider)?;

    let mut builder = LLMBuilder::new()
        .backend(backend)
        .model(&settings.model)
        .system(system);

    if !settings.api_key.is_empty() {
        builder = builder.api_key(&settings.api_key);
    }

    let llm = builder.build().map_err(|e| SuggestError::Build(e.to_string()))?;

    let messages = vec![ChatMessage::user().content(user_msg).build()];

    let response = tokio::time::timeout(REQUEST_TIMEOUT, llm.chat(&messages))
        .await
        .map_err(|_| SuggestError::Timeout(REQUEST_TIMEOUT))?
        .map_err(|e| SuggestError::Chat(e.to_string()))?;

    match response.text() {
        Some(text) if !text.trim().is_empty() => {
            debug!(len = text.len(), "received LLM reply");
            Ok(text)
        }
        _ => Err(SuggestError::EmptyResponse),
    }
}
