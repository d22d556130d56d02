use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::script::Script;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErasureMethod {
    Fast,
    Quality,
}

impl ErasureMethod {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "fast" | "telea" => Ok(ErasureMethod::Fast),
            "quality" | "fluid" | "ns" => Ok(ErasureMethod::Quality),
            other => Err(anyhow!("unknown erasure method '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridSettings {
    pub simple: String,
    pub complex: Vec<String>,
    pub threshold: usize,
    pub complexity_marks: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub source_lang: String,
    pub target_lang: String,
    pub languages: Vec<String>,
    pub worker_pool_size: usize,
    pub confidence_threshold: f32,
    pub detection_timeout: Duration,
    pub file_patterns: Vec<String>,

    pub engine: String,
    pub retry_ceiling: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub rate_limit_interval: Duration,
    pub max_outstanding: usize,
    pub translation_timeout: Duration,
    pub cache_capacity: usize,
    pub cache_max_age: Option<Duration>,
    pub cache_path: Option<PathBuf>,
    pub batch_size: usize,
    pub hybrid: HybridSettings,
    pub ai_model: Option<String>,
    pub ai_context: bool,

    pub erasure_method: ErasureMethod,
    pub erasure_margin: u32,
    pub erasure_radius: u32,
    pub erasure_iterations: u32,

    pub max_font_size: f32,
    pub min_font_size: f32,
    pub font_size_step: f32,
    pub line_spacing: f32,
    pub padding: f32,
    pub text_color: String,
    pub font_table: BTreeMap<Script, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_lang: "auto".to_string(),
            target_lang: "zh-CN".to_string(),
            languages: vec!["eng".to_string()],
            worker_pool_size: num_cpus::get().max(1),
            confidence_threshold: 0.5,
            detection_timeout: Duration::from_secs(60),
            file_patterns: Vec::new(),
            engine: "basic".to_string(),
            retry_ceiling: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            rate_limit_interval: Duration::from_millis(200),
            max_outstanding: 4,
            translation_timeout: Duration::from_secs(30),
            cache_capacity: 10_000,
            cache_max_age: None,
            cache_path: None,
            batch_size: 25,
            hybrid: HybridSettings {
                simple: "basic".to_string(),
                complex: vec!["premium".to_string()],
                threshold: 50,
                complexity_marks: 3,
            },
            ai_model: None,
            ai_context: true,
            erasure_method: ErasureMethod::Fast,
            erasure_margin: 2,
            erasure_radius: 5,
            erasure_iterations: 200,
            max_font_size: 48.0,
            min_font_size: 10.0,
            font_size_step: 1.0,
            line_spacing: 1.2,
            padding: 2.0,
            text_color: "auto".to_string(),
            font_table: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    pipeline: Option<PipelineSection>,
    translation: Option<TranslationSection>,
    erasure: Option<ErasureSection>,
    render: Option<RenderSection>,
    fonts: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelineSection {
    source_lang: Option<String>,
    target_lang: Option<String>,
    languages: Option<Vec<String>>,
    worker_pool_size: Option<usize>,
    confidence_threshold: Option<f32>,
    detection_timeout_ms: Option<u64>,
    file_patterns: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSection {
    engine: Option<String>,
    retry_ceiling: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    rate_limit_interval_ms: Option<u64>,
    max_outstanding: Option<usize>,
    timeout_ms: Option<u64>,
    cache_capacity: Option<usize>,
    cache_max_age_secs: Option<u64>,
    cache_path: Option<String>,
    batch_size: Option<usize>,
    hybrid: Option<HybridSection>,
    ai: Option<AiSection>,
}

#[derive(Debug, Default, Deserialize)]
struct HybridSection {
    simple: Option<String>,
    complex: Option<Vec<String>>,
    threshold: Option<usize>,
    complexity_marks: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AiSection {
    model: Option<String>,
    context: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ErasureSection {
    method: Option<String>,
    margin: Option<u32>,
    radius: Option<u32>,
    iterations: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSection {
    max_font_size: Option<f32>,
    min_font_size: Option<f32>,
    font_size_step: Option<f32>,
    line_spacing: Option<f32>,
    padding: Option<f32>,
    text_color: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults)?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content).with_context(|| {
                format!("failed to parse settings: {}", path.display())
            })?;
        }
    }

    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Parses a TOML document and layers it over the current values.
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed)
    }

    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(pipeline) = incoming.pipeline {
            if let Some(lang) = non_empty(pipeline.source_lang) {
                self.source_lang = lang;
            }
            if let Some(lang) = non_empty(pipeline.target_lang) {
                self.target_lang = lang;
            }
            if let Some(languages) = pipeline.languages {
                self.languages = languages;
            }
            if let Some(size) = pipeline.worker_pool_size
                && size > 0
            {
                self.worker_pool_size = size;
            }
            if let Some(threshold) = pipeline.confidence_threshold {
                self.confidence_threshold = threshold.clamp(0.0, 1.0);
            }
            if let Some(ms) = pipeline.detection_timeout_ms {
                self.detection_timeout = Duration::from_millis(ms.max(1));
            }
            if let Some(patterns) = pipeline.file_patterns {
                self.file_patterns = patterns;
            }
        }

        if let Some(translation) = incoming.translation {
            if let Some(engine) = non_empty(translation.engine) {
                self.engine = engine.to_lowercase();
            }
            if let Some(ceiling) = translation.retry_ceiling {
                self.retry_ceiling = ceiling.max(1);
            }
            if let Some(ms) = translation.retry_base_delay_ms {
                self.retry_base_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = translation.retry_max_delay_ms {
                self.retry_max_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = translation.rate_limit_interval_ms {
                self.rate_limit_interval = Duration::from_millis(ms);
            }
            if let Some(max) = translation.max_outstanding {
                self.max_outstanding = max.max(1);
            }
            if let Some(ms) = translation.timeout_ms {
                self.translation_timeout = Duration::from_millis(ms.max(1));
            }
            if let Some(capacity) = translation.cache_capacity {
                self.cache_capacity = capacity.max(1);
            }
            if let Some(secs) = translation.cache_max_age_secs {
                self.cache_max_age = Some(Duration::from_secs(secs));
            }
            if let Some(path) = non_empty(translation.cache_path) {
                self.cache_path = Some(PathBuf::from(path));
            }
            if let Some(size) = translation.batch_size {
                self.batch_size = size.max(1);
            }
            if let Some(hybrid) = translation.hybrid {
                if let Some(simple) = non_empty(hybrid.simple) {
                    self.hybrid.simple = simple.to_lowercase();
                }
                if let Some(complex) = hybrid.complex {
                    self.hybrid.complex = complex.into_iter().map(|v| v.to_lowercase()).collect();
                }
                if let Some(threshold) = hybrid.threshold {
                    self.hybrid.threshold = threshold;
                }
                if let Some(marks) = hybrid.complexity_marks {
                    self.hybrid.complexity_marks = marks;
                }
            }
            if let Some(ai) = translation.ai {
                if let Some(model) = non_empty(ai.model) {
                    self.ai_model = Some(model);
                }
                if let Some(context) = ai.context {
                    self.ai_context = context;
                }
            }
        }

        if let Some(erasure) = incoming.erasure {
            if let Some(method) = non_empty(erasure.method) {
                self.erasure_method = ErasureMethod::parse(&method)?;
            }
            if let Some(margin) = erasure.margin {
                self.erasure_margin = margin;
            }
            if let Some(radius) = erasure.radius {
                self.erasure_radius = radius.max(1);
            }
            if let Some(iterations) = erasure.iterations {
                self.erasure_iterations = iterations.max(1);
            }
        }

        if let Some(render) = incoming.render {
            if let Some(size) = render.max_font_size
                && size > 0.0
            {
                self.max_font_size = size;
            }
            if let Some(size) = render.min_font_size
                && size > 0.0
            {
                self.min_font_size = size;
            }
            if let Some(step) = render.font_size_step
                && step > 0.0
            {
                self.font_size_step = step;
            }
            if let Some(spacing) = render.line_spacing
                && spacing >= 1.0
            {
                self.line_spacing = spacing;
            }
            if let Some(padding) = render.padding {
                self.padding = padding.max(0.0);
            }
            if let Some(color) = non_empty(render.text_color) {
                self.text_color = color;
            }
        }

        if let Some(fonts) = incoming.fonts {
            for (key, value) in fonts {
                let script = Script::from_key(&key)
                    .ok_or_else(|| anyhow!("unknown script '{}' in [fonts]", key))?;
                if value.trim().is_empty() {
                    self.font_table.remove(&script);
                } else {
                    self.font_table.insert(script, value);
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.min_font_size > self.max_font_size {
            return Err(anyhow!(
                "min_font_size ({}) is larger than max_font_size ({})",
                self.min_font_size,
                self.max_font_size
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".doc-translator-rust"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).unwrap();
        assert_eq!(settings.engine, "basic");
        assert_eq!(settings.erasure_method, ErasureMethod::Fast);
        assert_eq!(settings.hybrid.threshold, 50);
        assert_eq!(settings.font_table.get(&Script::Han).map(String::as_str), Some("Noto Sans CJK SC"));
        assert!(settings.worker_pool_size >= 1);
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let mut settings = Settings::default();
        settings.merge_str(DEFAULT_SETTINGS_TOML).unwrap();
        settings
            .merge_str(
                r#"
                [translation]
                engine = "Hybrid"
                retry_ceiling = 0

                [erasure]
                method = "quality"

                [fonts]
                han = "/fonts/custom.otf"
                "#,
            )
            .unwrap();
        assert_eq!(settings.engine, "hybrid");
        assert_eq!(settings.retry_ceiling, 1);
        assert_eq!(settings.erasure_method, ErasureMethod::Quality);
        assert_eq!(settings.font_table[&Script::Han], "/fonts/custom.otf");
    }

    #[test]
    fn unknown_script_key_is_rejected() {
        let mut settings = Settings::default();
        let err = settings.merge_str("[fonts]\nklingon = \"x.ttf\"").unwrap_err();
        assert!(err.to_string().contains("klingon"));
    }

    #[test]
    fn extra_settings_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_settings(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("settings file not found"));
    }

    #[test]
    fn inverted_font_bounds_fail_validation() {
        let mut settings = Settings::default();
        settings
            .merge_str("[render]\nmax_font_size = 8.0\nmin_font_size = 12.0")
            .unwrap();
        assert!(settings.validate().is_err());
    }
}
