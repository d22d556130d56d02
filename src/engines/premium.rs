use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use super::{EngineFuture, EngineRequest, LanguagePair, TranslationEngine};
use crate::backend::retry::status_error;
use crate::error::EngineError;

const PRO_BASE_URL: &str = "https://api.deepl.com";
const FREE_BASE_URL: &str = "https://api-free.deepl.com";

/// DeepL v2 API. Accepts many segments per request.
pub struct PremiumEngine {
    client: reqwest::Client,
    key: String,
    base_url: String,
}

impl PremiumEngine {
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("DEEPL_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("DEEPL_API_KEY is required for the premium engine"))?;
        let base_url = std::env::var("DEEPL_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        Ok(Self::new(key, base_url))
    }

    pub fn new(key: impl Into<String>, base_url: Option<String>) -> Self {
        let key = key.into();
        // Free-tier keys end in ":fx" and live on a separate host.
        let base_url = base_url.unwrap_or_else(|| {
            if key.ends_with(":fx") {
                FREE_BASE_URL.to_string()
            } else {
                PRO_BASE_URL.to_string()
            }
        });
        Self {
            client: reqwest::Client::new(),
            key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn translate_batch(&self, request: &EngineRequest) -> Result<Vec<String>, EngineError> {
        let body = DeeplRequest::new(&request.segments, &request.langs);
        let response = self
            .client
            .post(format!("{}/v2/translate", self.base_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let detail = serde_json::from_str::<DeeplError>(&text)
                .ok()
                .and_then(|err| err.message);
            return Err(status_error("DeepL", status, &headers, &text, detail));
        }

        let payload: DeeplResponse = serde_json::from_str(&text).map_err(|err| {
            EngineError::transient(format!("failed to parse DeepL response JSON: {}", err))
        })?;
        Ok(payload
            .translations
            .into_iter()
            .map(|item| item.text)
            .collect())
    }
}

impl TranslationEngine for PremiumEngine {
    fn id(&self) -> &str {
        "premium"
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn translate(&self, request: EngineRequest) -> EngineFuture<'_> {
        Box::pin(async move { self.translate_batch(&request).await })
    }
}

#[derive(Debug, Serialize)]
struct DeeplRequest<'a> {
    text: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
    target_lang: String,
}

impl<'a> DeeplRequest<'a> {
    fn new(text: &'a [String], langs: &LanguagePair) -> Self {
        let source_lang = if langs.source_is_auto() {
            None
        } else {
            Some(source_code(&langs.source))
        };
        Self {
            text,
            source_lang,
            target_lang: target_code(&langs.target),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeeplResponse {
    translations: Vec<DeeplTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeeplTranslation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct DeeplError {
    message: Option<String>,
}

fn base_code(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Source codes never carry a variant.
fn source_code(code: &str) -> String {
    base_code(code)
}

fn target_code(code: &str) -> String {
    let lower = code.trim().to_lowercase().replace('_', "-");
    match lower.as_str() {
        "en" => "EN-US".to_string(),
        "en-gb" | "en-us" => lower.to_uppercase(),
        "pt" => "PT-PT".to_string(),
        "pt-br" | "pt-pt" => lower.to_uppercase(),
        "zh" | "zh-cn" | "zh-hans" | "zh-sg" => "ZH-HANS".to_string(),
        "zh-tw" | "zh-hk" | "zh-hant" => "ZH-HANT".to_string(),
        _ => base_code(&lower),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_target_codes() {
        assert_eq!(target_code("en"), "EN-US");
        assert_eq!(target_code("zh-CN"), "ZH-HANS");
        assert_eq!(target_code("zh_TW"), "ZH-HANT");
        assert_eq!(target_code("pt"), "PT-PT");
        assert_eq!(target_code("ja"), "JA");
        assert_eq!(target_code("de-AT"), "DE");
        assert_eq!(source_code("zh-CN"), "ZH");
    }

    #[test]
    fn free_keys_use_the_free_host() {
        assert_eq!(PremiumEngine::new("abc:fx", None).base_url, FREE_BASE_URL);
        assert_eq!(PremiumEngine::new("abc", None).base_url, PRO_BASE_URL);
        let custom = PremiumEngine::new("abc", Some("http://localhost:9000/".into()));
        assert_eq!(custom.base_url, "http://localhost:9000");
    }

    #[test]
    fn auto_source_is_omitted() {
        let segments = vec!["Hello".to_string()];
        let body = DeeplRequest::new(&segments, &LanguagePair::new("auto", "zh-CN"));
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"text": ["Hello"], "target_lang": "ZH-HANS"})
        );
    }
}
