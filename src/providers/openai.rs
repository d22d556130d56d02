use serde::Deserialize;
use serde_json::json;

use super::{
    Message, MessageRole, Provider, ProviderFuture, ProviderResponse, ProviderUsage, ToolSpec,
    format_error_parts, malformed,
};
use crate::backend::retry::status_error;
use crate::error::EngineError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    messages: Vec<Message>,
    tools: Vec<ToolSpec>,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    fn find_tool(&self, name: &str) -> Result<&ToolSpec, EngineError> {
        self.tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| EngineError::permanent(format!("tool '{}' not registered", name)))
    }
}

impl Provider for OpenAI {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn register_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    fn call_tool(self, tool_name: &str) -> ProviderFuture {
        let tool_name = tool_name.to_string();
        Box::pin(async move {
            let tool = self.find_tool(&tool_name)?.clone();
            call_with_chat_completions(self, tool, &tool_name).await
        })
    }
}

fn base_url() -> String {
    std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn call_with_chat_completions(
    provider: OpenAI,
    tool: ToolSpec,
    tool_name: &str,
) -> Result<ProviderResponse, EngineError> {
    let client = reqwest::Client::new();
    let url = format!("{}/chat/completions", base_url());

    let messages = provider
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
            };
            json!({"role": role, "content": message.content})
        })
        .collect::<Vec<_>>();

    let body = json!({
        "model": provider.model,
        "messages": messages,
        "tools": [
            {
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters
                }
            }
        ],
        "tool_choice": {"type": "function", "function": {"name": tool.name}}
    });

    let response = client
        .post(&url)
        .bearer_auth(&provider.key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(status_error(
            "OpenAI",
            status,
            &headers,
            &text,
            extract_openai_error(&text),
        ));
    }
    extract_tool_response(&text, tool_name, &provider.model)
}

fn extract_tool_response(
    text: &str,
    tool_name: &str,
    fallback_model: &str,
) -> Result<ProviderResponse, EngineError> {
    let payload: OpenAIResponse =
        serde_json::from_str(text).map_err(|err| malformed("OpenAI", "response JSON", err))?;
    let tool_call = payload
        .choices
        .first()
        .and_then(|choice| choice.message.tool_calls.first())
        .ok_or_else(|| EngineError::transient("no tool call returned from OpenAI"))?;

    if tool_call.function.name != tool_name {
        return Err(EngineError::transient(format!(
            "unexpected tool name '{}' from OpenAI",
            tool_call.function.name
        )));
    }

    let args: serde_json::Value = serde_json::from_str(&tool_call.function.arguments)
        .map_err(|err| malformed("OpenAI", "tool arguments", err))?;
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse { args, model, usage })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, error.code))
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    const PAYLOAD: &str = r#"{
        "model": "gpt-4o-mini-2024-07-18",
        "choices": [{
            "message": {
                "tool_calls": [{
                    "function": {
                        "name": "deliver_translation",
                        "arguments": "{\"translations\":[{\"id\":0,\"translation\":\"你好\"}]}"
                    }
                }]
            }
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 9, "total_tokens": 129}
    }"#;

    #[test]
    fn extracts_tool_arguments() {
        let response = extract_tool_response(PAYLOAD, "deliver_translation", DEFAULT_MODEL).unwrap();
        assert_json_snapshot!(response, @r#"
        {
          "args": {
            "translations": [
              {
                "id": 0,
                "translation": "你好"
              }
            ]
          },
          "model": "gpt-4o-mini-2024-07-18",
          "usage": {
            "prompt_tokens": 120,
            "completion_tokens": 9,
            "total_tokens": 129
          }
        }
        "#);
    }

    #[test]
    fn wrong_tool_name_is_transient() {
        let err = extract_tool_response(PAYLOAD, "other_tool", DEFAULT_MODEL).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn reads_error_body() {
        let body = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        assert_eq!(
            extract_openai_error(body).unwrap(),
            "Incorrect API key | type: invalid_request_error | code: invalid_api_key"
        );
    }
}
