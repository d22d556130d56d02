use serde_json::Value;

use super::{EngineFuture, EngineRequest, LanguagePair, TranslationEngine};
use crate::backend::retry::status_error;
use crate::error::EngineError;

const DEFAULT_BASE_URL: &str = "https://translate.googleapis.com";

/// Free web translation endpoint. One segment per HTTP call.
pub struct BasicEngine {
    client: reqwest::Client,
    base_url: String,
}

impl BasicEngine {
    pub fn new() -> Self {
        let base_url = std::env::var("GOOGLE_TRANSLATE_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn translate_one(&self, text: &str, langs: &LanguagePair) -> Result<String, EngineError> {
        let url = format!("{}/translate_a/single", self.base_url);
        let source = if langs.source_is_auto() {
            "auto"
        } else {
            langs.source.as_str()
        };
        let response = self
            .client
            .get(&url)
            .query(&[
                ("client", "gtx"),
                ("sl", source),
                ("tl", langs.target.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error("Google", status, &headers, &body, None));
        }
        parse_gtx_response(&body)
    }
}

impl Default for BasicEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationEngine for BasicEngine {
    fn id(&self) -> &str {
        "basic"
    }

    fn translate(&self, request: EngineRequest) -> EngineFuture<'_> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(request.segments.len());
            for segment in &request.segments {
                out.push(self.translate_one(segment, &request.langs).await?);
            }
            Ok(out)
        })
    }
}

/// The endpoint answers `[[["translated","original",...],...],...]`.
fn parse_gtx_response(body: &str) -> Result<String, EngineError> {
    let value: Value = serde_json::from_str(body).map_err(|err| {
        EngineError::transient(format!("failed to parse Google response JSON: {}", err))
    })?;
    let sentences = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::permanent("unexpected Google response shape"))?;
    let mut out = String::new();
    for sentence in sentences {
        if let Some(part) = sentence.get(0).and_then(Value::as_str) {
            out.push_str(part);
        }
    }
    if out.trim().is_empty() {
        return Err(EngineError::permanent("empty translation from Google"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_sentence_fragments() {
        let body = r#"[[["你好。","Hello.",null,null,10],["世界","World",null,null,10]],null,"en"]"#;
        assert_eq!(parse_gtx_response(body).unwrap(), "你好。世界");
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(!parse_gtx_response("{\"error\":1}").unwrap_err().is_transient());
        assert!(parse_gtx_response("<html>").unwrap_err().is_transient());
    }
}
