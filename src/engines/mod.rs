use anyhow::{Result, anyhow};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::EngineError;
use crate::settings::Settings;

mod ai;
mod basic;
mod hybrid;
mod premium;

pub use ai::AiContextEngine;
pub use basic::BasicEngine;
pub use hybrid::HybridRouter;
pub use premium::PremiumEngine;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn source_is_auto(&self) -> bool {
        let source = self.source.trim();
        source.is_empty() || source.eq_ignore_ascii_case("auto")
    }
}

/// One engine call. Responses must hold one translation per segment, in
/// request order.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub segments: Vec<String>,
    pub langs: LanguagePair,
    /// Surrounding text of the unit, used by engines that accept context.
    pub context: Option<String>,
}

pub type EngineFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, EngineError>> + Send + 'a>>;

pub trait TranslationEngine: Send + Sync {
    /// Cache partition and rate-limit identity.
    fn id(&self) -> &str;

    fn supports_batch(&self) -> bool {
        false
    }

    fn translate(&self, request: EngineRequest) -> EngineFuture<'_>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Basic,
    Premium,
    AiContext,
    Hybrid,
}

impl EngineKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "basic" | "free" | "google" => Ok(EngineKind::Basic),
            "premium" | "deepl" => Ok(EngineKind::Premium),
            "ai" | "ai-context" | "ai_context" | "llm" => Ok(EngineKind::AiContext),
            "hybrid" => Ok(EngineKind::Hybrid),
            other => Err(anyhow!(
                "unknown engine '{}' (expected basic, premium, ai or hybrid)",
                other
            )),
        }
    }
}

/// The active translation capability: a single engine or a router over
/// several tiers.
#[derive(Clone)]
pub enum Engine {
    Single(Arc<dyn TranslationEngine>),
    Hybrid(HybridRouter),
}

impl Engine {
    pub fn single(engine: impl TranslationEngine + 'static) -> Self {
        Engine::Single(Arc::new(engine))
    }

    /// Tiers to try for `text`, preferred engine first.
    pub fn route(&self, text: &str) -> Vec<Arc<dyn TranslationEngine>> {
        match self {
            Engine::Single(engine) => vec![engine.clone()],
            Engine::Hybrid(router) => router.route(text),
        }
    }

    /// Every distinct engine reachable from this capability.
    pub fn engines(&self) -> Vec<Arc<dyn TranslationEngine>> {
        match self {
            Engine::Single(engine) => vec![engine.clone()],
            Engine::Hybrid(router) => router.engines(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Engine::Single(engine) => engine.id().to_string(),
            Engine::Hybrid(router) => format!(
                "hybrid({})",
                router
                    .engines()
                    .iter()
                    .map(|engine| engine.id().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

pub fn build_engine(settings: &Settings) -> Result<Engine> {
    match EngineKind::parse(&settings.engine)? {
        EngineKind::Hybrid => {
            let simple = build_tier(&settings.hybrid.simple, settings)?;
            let complex = settings
                .hybrid
                .complex
                .iter()
                .map(|name| build_tier(name, settings))
                .collect::<Result<Vec<_>>>()?;
            Ok(Engine::Hybrid(HybridRouter::new(
                simple,
                complex,
                settings.hybrid.threshold,
                settings.hybrid.complexity_marks,
            )))
        }
        _ => Ok(Engine::Single(build_tier(&settings.engine, settings)?)),
    }
}

fn build_tier(name: &str, settings: &Settings) -> Result<Arc<dyn TranslationEngine>> {
    let engine: Arc<dyn TranslationEngine> = match EngineKind::parse(name)? {
        EngineKind::Basic => Arc::new(BasicEngine::new()),
        EngineKind::Premium => Arc::new(PremiumEngine::from_env()?),
        EngineKind::AiContext => Arc::new(AiContextEngine::from_settings(settings)?),
        EngineKind::Hybrid => return Err(anyhow!("hybrid cannot be a tier of hybrid")),
    };
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_engine_names() {
        assert_eq!(EngineKind::parse("Basic").unwrap(), EngineKind::Basic);
        assert_eq!(EngineKind::parse("deepl").unwrap(), EngineKind::Premium);
        assert_eq!(EngineKind::parse("ai").unwrap(), EngineKind::AiContext);
        assert!(EngineKind::parse("babelfish").is_err());
    }

    #[test]
    fn builds_basic_engine() {
        let settings = Settings::default();
        let engine = build_engine(&settings).unwrap();
        assert_eq!(engine.describe(), "basic");
        assert_eq!(engine.route("Hello").len(), 1);
    }

    #[test]
    fn hybrid_cannot_nest() {
        let mut settings = Settings::default();
        settings.engine = "hybrid".into();
        settings.hybrid.simple = "hybrid".into();
        assert!(build_engine(&settings).is_err());
    }
}
