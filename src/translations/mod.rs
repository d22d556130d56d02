use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tera::{Context as TeraContext, Tera};

use crate::engines::LanguagePair;
use crate::error::EngineError;
use crate::providers::ToolSpec;

pub const TOOL_NAME: &str = "deliver_translation";

const SYSTEM_PROMPT: &str = include_str!("prompts/system_prompt.tera");

pub fn tool_spec(tool_name: &str) -> ToolSpec {
    let parameters = json!({
        "type": "object",
        "properties": {
            "translations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "translation": {"type": "string"}
                    },
                    "required": ["id", "translation"]
                }
            }
        },
        "required": ["translations"]
    });

    ToolSpec {
        name: tool_name.to_string(),
        description: "Return one translation per input fragment id.".to_string(),
        parameters,
    }
}

pub fn render_system_prompt(langs: &LanguagePair, tool_name: &str, has_context: bool) -> Result<String> {
    let mut context = TeraContext::new();
    let source = if langs.source_is_auto() {
        "auto"
    } else {
        langs.source.as_str()
    };
    context.insert("source_lang", source);
    context.insert("target_lang", langs.target.as_str());
    context.insert("has_context", &has_context);
    context.insert("tool_name", tool_name);

    Tera::one_off(SYSTEM_PROMPT, &context, false).with_context(|| "failed to render system prompt")
}

/// User message: the fragments keyed by position, plus optional context.
pub fn render_user_payload(segments: &[String], context: Option<&str>) -> String {
    let fragments = segments
        .iter()
        .enumerate()
        .map(|(id, text)| json!({"id": id, "text": text}))
        .collect::<Vec<_>>();
    let mut payload = json!({ "fragments": fragments });
    if let Some(context) = context.filter(|value| !value.trim().is_empty()) {
        payload["context"] = json!(context);
    }
    payload.to_string()
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    translations: Vec<ToolTranslation>,
}

#[derive(Debug, Deserialize)]
struct ToolTranslation {
    id: usize,
    translation: String,
}

/// Orders tool output by id. Missing, duplicate or unknown ids are
/// reported as transient so the call is retried.
pub fn parse_tool_args(value: Value, expected: usize) -> Result<Vec<String>, EngineError> {
    let args: ToolArgs = serde_json::from_value(value)
        .map_err(|err| EngineError::transient(format!("invalid tool arguments: {}", err)))?;

    let mut slots: Vec<Option<String>> = vec![None; expected];
    for item in args.translations {
        let slot = slots.get_mut(item.id).ok_or_else(|| {
            EngineError::transient(format!("tool response has unknown id {}", item.id))
        })?;
        if slot.is_some() {
            return Err(EngineError::transient(format!(
                "tool response repeats id {}",
                item.id
            )));
        }
        if item.translation.trim().is_empty() {
            return Err(EngineError::transient(format!(
                "translation for id {} is empty",
                item.id
            )));
        }
        *slot = Some(item.translation);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(id, slot)| {
            slot.ok_or_else(|| {
                EngineError::transient(format!("tool response is missing id {}", id))
            })
        })
        .collect()
}
