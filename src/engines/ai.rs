use anyhow::{Context, Result};
use tracing::debug;

use super::{EngineFuture, EngineRequest, TranslationEngine};
use crate::error::EngineError;
use crate::providers::{self, Provider, ProviderImpl};
use crate::settings::Settings;
use crate::translations;

/// LLM-backed engine. Sends a whole batch in one tool call and may pass
/// the unit's surrounding text as disambiguation context.
pub struct AiContextEngine {
    provider: ProviderImpl,
    id: String,
    use_context: bool,
}

impl AiContextEngine {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let model_arg = settings.ai_model.as_deref().unwrap_or("openai");
        let selection = providers::parse_model_arg(model_arg)?;
        let key = providers::resolve_key(selection.provider)
            .with_context(|| "the ai engine needs a provider API key")?;
        let model = selection.model();
        let id = format!("ai-context/{}/{}", selection.provider.as_str(), model);
        let provider = providers::build_provider(selection.provider, key, model);
        Ok(Self::new(provider, id, settings.ai_context))
    }

    pub fn new(provider: ProviderImpl, id: impl Into<String>, use_context: bool) -> Self {
        Self {
            provider,
            id: id.into(),
            use_context,
        }
    }
}

impl TranslationEngine for AiContextEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn translate(&self, request: EngineRequest) -> EngineFuture<'_> {
        Box::pin(async move {
            let context = if self.use_context {
                request.context.as_deref()
            } else {
                None
            };
            let system = translations::render_system_prompt(
                &request.langs,
                translations::TOOL_NAME,
                context.is_some(),
            )
            .map_err(|err| EngineError::permanent(format!("{:#}", err)))?;
            let payload = translations::render_user_payload(&request.segments, context);

            let response = self
                .provider
                .clone()
                .append_system_input(system)
                .append_user_input(payload)
                .register_tool(translations::tool_spec(translations::TOOL_NAME))
                .call_tool(translations::TOOL_NAME)
                .await?;
            debug!(
                engine = %self.id,
                model = response.model.as_deref().unwrap_or(""),
                segments = request.segments.len(),
                "ai engine responded"
            );
            translations::parse_tool_args(response.args, request.segments.len())
        })
    }
}
