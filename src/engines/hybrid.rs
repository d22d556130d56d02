use std::sync::Arc;

use super::TranslationEngine;

/// Routes short, simple segments to the basic tier and everything else to
/// the higher-quality tiers. The tiers not chosen first remain fallbacks.
#[derive(Clone)]
pub struct HybridRouter {
    simple: Arc<dyn TranslationEngine>,
    complex: Vec<Arc<dyn TranslationEngine>>,
    threshold: usize,
    complexity_marks: usize,
}

impl HybridRouter {
    pub fn new(
        simple: Arc<dyn TranslationEngine>,
        complex: Vec<Arc<dyn TranslationEngine>>,
        threshold: usize,
        complexity_marks: usize,
    ) -> Self {
        Self {
            simple,
            complex,
            threshold,
            complexity_marks,
        }
    }

    pub fn is_simple(&self, text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.chars().count() < self.threshold
            && sentence_marks(trimmed) < self.complexity_marks.max(1)
    }

    pub fn route(&self, text: &str) -> Vec<Arc<dyn TranslationEngine>> {
        let mut tiers = Vec::with_capacity(self.complex.len() + 1);
        if self.is_simple(text) || self.complex.is_empty() {
            tiers.push(self.simple.clone());
            tiers.extend(self.complex.iter().cloned());
        } else {
            tiers.extend(self.complex.iter().cloned());
            tiers.push(self.simple.clone());
        }
        dedup_by_id(tiers)
    }

    pub fn engines(&self) -> Vec<Arc<dyn TranslationEngine>> {
        let mut all = vec![self.simple.clone()];
        all.extend(self.complex.iter().cloned());
        dedup_by_id(all)
    }
}

fn dedup_by_id(tiers: Vec<Arc<dyn TranslationEngine>>) -> Vec<Arc<dyn TranslationEngine>> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(tiers.len());
    for tier in tiers {
        if seen.iter().any(|id| id == tier.id()) {
            continue;
        }
        seen.push(tier.id().to_string());
        out.push(tier);
    }
    out
}

fn sentence_marks(text: &str) -> usize {
    text.chars()
        .filter(|ch| matches!(ch, '.' | '!' | '?' | ';' | '\n' | '。' | '！' | '？' | '；'))
        .count()
}
