use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub mod adapters;
pub mod backend;
pub mod compose;
pub mod detect;
pub mod engines;
pub mod erase;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod script;
pub mod settings;
mod text;
mod translations;
pub mod unit;

pub use error::{EngineError, ErrorKind};
pub use pipeline::{
    BatchItem, BatchSummary, Job, JobProgress, OutputDestination, Pipeline, PipelineOptions,
};
pub use settings::Settings;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Files or directories to translate.
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub settings_path: Option<PathBuf>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub engine: Option<String>,
    pub workers: Option<usize>,
    pub show_detector_languages: bool,
}

/// Translates every input into `config.output_dir` and returns the batch
/// summary as pretty JSON.
pub async fn run(config: Config) -> Result<String> {
    if config.show_detector_languages {
        return Ok(detect::list_tesseract_languages()?.join("\n"));
    }

    let mut settings = settings::load_settings(config.settings_path.as_deref())?;
    apply_overrides(&mut settings, &config);
    if config.inputs.is_empty() {
        return Err(anyhow!("no input files given"));
    }

    let engine = engines::build_engine(&settings)?;
    let cache = Arc::new(open_cache(&settings)?);
    let backend = Arc::new(backend::TranslationBackend::new(
        engine,
        cache.clone(),
        backend::BackendConfig::from_settings(&settings),
    ));
    let fonts = Arc::new(compose::FontTable::load(&settings.font_table));
    if fonts.is_empty() {
        warn!("no fonts resolved from [fonts]; raster regions will be left erased");
    }
    let pipeline = Pipeline::new(
        Arc::new(detect::TesseractDetector::new()),
        backend,
        Arc::new(erase::Eraser::from_settings(&settings)),
        Arc::new(compose::Compositor::from_settings(&settings, fonts)?),
        PipelineOptions::from_settings(&settings),
    );

    let paths = pipeline::collect_inputs(&config.inputs, &settings.file_patterns)?;
    info!(inputs = paths.len(), engine = %settings.engine, "starting batch");
    let items = paths
        .iter()
        .map(|path| BatchItem::read(path))
        .collect::<Vec<_>>();

    let job = Job::new();
    let summary = pipeline
        .run_batch(items, &OutputDestination::Directory(config.output_dir), &job)
        .await;

    if let Err(err) = cache.compact() {
        warn!("failed to compact translation cache: {:#}", err);
    }
    let rendered =
        serde_json::to_string_pretty(&summary).with_context(|| "failed to render summary")?;
    if let Some(fatal) = &summary.aborted {
        return Err(anyhow!("{}\n{}", rendered, fatal));
    }
    Ok(rendered)
}

fn apply_overrides(settings: &mut Settings, config: &Config) {
    if let Some(source) = &config.source_lang {
        settings.source_lang = source.clone();
    }
    if let Some(target) = &config.target_lang {
        settings.target_lang = target.clone();
    }
    if let Some(engine) = &config.engine {
        settings.engine = engine.clone();
    }
    if let Some(workers) = config.workers {
        settings.worker_pool_size = workers.max(1);
    }
}

fn open_cache(settings: &Settings) -> Result<backend::TranslationCache> {
    match settings.cache_path.as_deref() {
        Some(path) => load_cache(path, settings),
        None => Ok(backend::TranslationCache::new(settings.cache_capacity)
            .with_max_age(settings.cache_max_age)),
    }
}

fn load_cache(path: &Path, settings: &Settings) -> Result<backend::TranslationCache> {
    backend::TranslationCache::load(path, settings.cache_capacity, settings.cache_max_age)
        .with_context(|| format!("failed to open translation cache {}", path.display()))
}
