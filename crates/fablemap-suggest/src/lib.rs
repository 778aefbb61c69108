pub mod engine;
pub mod parse;
pub mod prompt;

use std::time::Duration;

use fablemap_core::instruction::{instruction_list, parse_instructions};
use fablemap_core::{ai_configured, AiSettings, Instruction, MapViewData};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("AI is not configured (provider, model and API key are required)")]
    NotConfigured,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("build LLM: {0}")]
    Build(String),
    #[error("chat: {0}")]
    Chat(String),
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),
    #[error("LLM returned no text")]
    EmptyResponse,
    #[error("could not find map instructions in the AI reply")]
    Unparseable { raw: String },
}

/// Ask the configured model how `narrative` changes `map`.
///
/// The map is only read; the caller applies the returned batch to whatever
/// its current snapshot is by the time the reply arrives.
pub async fn generate_instructions(
    map: &MapViewData,
    narrative: &str,
    settings: &AiSettings,
) -> Result<Vec<Instruction>, SuggestError> {
    if !ai_configured(settings) {
        return Err(SuggestError::NotConfigured);
    }
    let system = prompt::system_prompt();
    let user_msg = prompt::user_message(map, narrative);

    info!(provider = %settings.provider, model = %settings.model, "requesting map instructions");
    let raw = engine::generate(settings, &system, &user_msg).await?;
    let instructions = instructions_from_reply(&raw)?;
    info!(count = instructions.len(), "parsed map instructions");
    Ok(instructions)
}

/// An instruction list that is empty or holds at least one object.
fn looks_like_instructions(v: &Value) -> bool {
    instruction_list(v).is_some_and(|list| list.is_empty() || list.iter().any(Value::is_object))
}

/// Turn a raw model reply into instructions.
///
/// A reply with no recoverable payload is an error, never an empty batch, so
/// callers can tell "nothing to add" apart from "could not read the answer".
pub fn instructions_from_reply(raw: &str) -> Result<Vec<Instruction>, SuggestError> {
    let payload = parse::extract_payload_where(raw, looks_like_instructions);
    match payload {
        Some(payload) => Ok(parse_instructions(&payload)),
        None => {
            warn!(len = raw.len(), "AI reply had no instruction payload");
            Err(SuggestError::Unparseable {
                raw: raw.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_payload() {
        let raw = "```json\n{\"instructions\":[{\"op_code\":\"CREATE_SPOT\",\"id\":\"inn\"},{\"op_code\":\"NOPE\"}]}\n```";
        let ins = instructions_from_reply(raw).unwrap();
        assert_eq!(ins.len(), 1);
        assert_eq!(ins[0].op_code(), "CREATE_SPOT");
    }

    #[test]
    fn empty_batch_is_not_an_error() {
        assert!(instructions_from_reply("{\"instructions\": []}").unwrap().is_empty());
    }

    #[test]
    fn footnote_brackets_do_not_hide_the_batch() {
        let raw = r#"See note [1]. {"instructions":[{"op_code":"CREATE_SPOT","id":"inn"}]}"#;
        let batch = instructions_from_reply(raw).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn unreadable_reply_is_an_error() {
        assert!(matches!(
            instructions_from_reply("The map looks great already!"),
            Err(SuggestError::Unparseable { .. })
        ));
        assert!(matches!(
            instructions_from_reply("{\"thoughts\": \"none\"}"),
            Err(SuggestError::Unparseable { .. })
        ));
    }

    #[tokio::test]
    async fn unconfigured_settings_fail_before_any_request() {
        let err = generate_instructions(&MapViewData::default(), "story", &AiSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestError::NotConfigured));
    }
}
