use futures_util::StreamExt;
use futures_util::stream;
use image::RgbaImage;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::adapters::DocumentFormat;
use crate::backend::{SegmentOutcome, TranslationBackend};
use crate::compose::RegionRenderer;
use crate::detect::{TextDetector, finalize_regions, structured_regions};
use crate::engines::LanguagePair;
use crate::erase::RegionEraser;
use crate::error::ErrorKind;
use crate::script::Script;
use crate::settings::Settings;
use crate::text::{is_translatable, preserve_whitespace};
use crate::unit::{PipelineUnit, Surface, TextRegion, TextRun, UnitId};

mod batch;
mod job;
mod report;
mod state;

pub use batch::{
    BatchItem, BatchSummary, ItemOutcome, ItemStatus, OutputDestination, collect_inputs,
    output_ordinals,
};
pub use job::{Job, JobProgress, JobSnapshot, UnitStatus};
pub use report::{RegionReport, RegionStatus, SkipReason, UnitReport};
pub use state::{InvalidTransition, UnitMachine, UnitState};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub langs: LanguagePair,
    /// Detector language hints.
    pub hints: Vec<String>,
    pub worker_pool_size: usize,
    pub confidence_threshold: f32,
    pub detection_timeout: Duration,
    /// Send the unit's other text along as context to engines that use it.
    pub use_context: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            langs: LanguagePair::new(&settings.source_lang, &settings.target_lang),
            hints: settings.languages.clone(),
            worker_pool_size: settings.worker_pool_size.max(1),
            confidence_threshold: settings.confidence_threshold,
            detection_timeout: settings.detection_timeout,
            use_context: settings.ai_context,
        }
    }
}

/// Result of running one unit through the stages.
pub struct UnitOutcome {
    pub report: UnitReport,
    /// The rebuilt surface when the unit finished, the original otherwise.
    pub surface: Surface,
    /// The unit finished and its surface differs from the opened one.
    pub changed: bool,
}

/// Runs documents through detect, translate, erase and render with a
/// bounded number of units in flight.
pub struct Pipeline {
    detector: Arc<dyn TextDetector>,
    backend: Arc<TranslationBackend>,
    eraser: Arc<dyn RegionEraser>,
    renderer: Arc<dyn RegionRenderer>,
    options: PipelineOptions,
    slots: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        backend: Arc<TranslationBackend>,
        eraser: Arc<dyn RegionEraser>,
        renderer: Arc<dyn RegionRenderer>,
        options: PipelineOptions,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(options.worker_pool_size.max(1)));
        Self {
            detector,
            backend,
            eraser,
            renderer,
            options,
            slots,
        }
    }

    pub fn backend(&self) -> &Arc<TranslationBackend> {
        &self.backend
    }

    /// Processes every item and reports each one. A fatal error cancels
    /// the job; units already running finish and the rest stay pending.
    pub async fn run_batch(
        &self,
        items: Vec<BatchItem>,
        destination: &OutputDestination,
        job: &Job,
    ) -> BatchSummary {
        if let OutputDestination::Directory(dir) = destination
            && let Err(err) = fs::create_dir_all(dir)
        {
            let fatal = ErrorKind::Fatal(format!(
                "cannot create output directory {}: {err}",
                dir.display()
            ));
            return BatchSummary::from_items(Vec::new(), Some(fatal), self.backend.stats());
        }

        let pool = self.options.worker_pool_size.max(1);
        let ordinals = output_ordinals(&items);
        let mut results = stream::iter(items.into_iter().zip(ordinals).enumerate())
            .map(|(document, (item, ordinal))| async move {
                let outcome = self
                    .run_document(document, &item, ordinal, destination, job)
                    .await;
                (document, outcome)
            })
            .buffer_unordered(pool)
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(document, _)| *document);

        let mut aborted = None;
        let per_item = results
            .into_iter()
            .map(|(_, outcome)| match outcome {
                Ok(item) => item,
                Err((item, fatal)) => {
                    aborted.get_or_insert(fatal);
                    item
                }
            })
            .collect::<Vec<_>>();
        let summary = BatchSummary::from_items(per_item, aborted, self.backend.stats());
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "batch finished"
        );
        summary
    }

    async fn run_document(
        &self,
        document: usize,
        item: &BatchItem,
        ordinal: Option<usize>,
        destination: &OutputDestination,
        job: &Job,
    ) -> Result<ItemOutcome, (ItemOutcome, ErrorKind)> {
        let placeholder = UnitId { document, index: 0 };
        let opened = match &item.unreadable {
            Some(err) => Err(err.clone()),
            None => DocumentFormat::detect(&item.bytes, item.path.as_deref()),
        }
        .and_then(|format| {
            let adapter = format.adapter();
            let units = adapter.open(document, &item.bytes)?;
            Ok((format, adapter, units))
        });
        let (format, adapter, units) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                warn!(item = %item.name, "cannot open document: {err}");
                job.register(&[placeholder]);
                job.settle(placeholder, Err(err.clone()));
                return Ok(ItemOutcome::failed(&item.name, err));
            }
        };
        let unit_ids = units.iter().map(|unit| unit.id).collect::<Vec<_>>();
        job.register(&unit_ids);
        info!(item = %item.name, format = format.extension(), units = units.len(), "document opened");

        let mut outcomes = stream::iter(units)
            .map(|unit| self.process_unit(unit, job))
            .buffer_unordered(self.options.worker_pool_size.max(1))
            .collect::<Vec<_>>()
            .await;
        outcomes.sort_by_key(|outcome| outcome.report.unit);

        let mut outcome = ItemOutcome {
            name: item.name.clone(),
            status: ItemStatus::Succeeded,
            format: Some(format.extension().to_string()),
            output: None,
            bytes: None,
            error: None,
            units: Vec::new(),
        };
        let fatal = outcomes.iter().find_map(|unit| {
            unit.report
                .error
                .as_ref()
                .filter(|err| err.is_fatal())
                .cloned()
        });
        let cancelled = outcomes.iter().any(|unit| unit.report.state == "pending");
        outcome.error = outcomes.iter().find_map(|unit| unit.report.error.clone());
        let all_failed = !outcomes.is_empty() && outcomes.iter().all(|unit| unit.report.state == "failed");

        let (reports, surfaces): (Vec<_>, Vec<_>) = outcomes
            .into_iter()
            .map(|unit| (unit.report, unit.changed.then_some(unit.surface)))
            .unzip();
        outcome.units = reports;

        if let Some(fatal) = fatal {
            outcome.status = ItemStatus::Failed;
            return Err((outcome, fatal));
        }
        if cancelled {
            outcome.status = ItemStatus::Cancelled;
            return Ok(outcome);
        }
        if outcome.error.is_some() {
            outcome.status = ItemStatus::Failed;
        }
        if all_failed {
            return Ok(outcome);
        }

        let rebuilt = match adapter.reassemble(&item.bytes, &surfaces) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(item = %item.name, "reassembly failed: {err:#}");
                outcome.status = ItemStatus::Failed;
                outcome.error = Some(ErrorKind::RenderSkipped(format!("reassembly failed: {err:#}")));
                return Ok(outcome);
            }
        };
        match destination {
            OutputDestination::Memory => outcome.bytes = Some(rebuilt),
            OutputDestination::Directory(dir) => {
                let path = dir.join(item.output_name(format.extension(), ordinal));
                if let Err(err) = fs::write(&path, rebuilt) {
                    let fatal = ErrorKind::Fatal(format!("cannot write {}: {err}", path.display()));
                    outcome.status = ItemStatus::Failed;
                    outcome.error = Some(fatal.clone());
                    return Err((outcome, fatal));
                }
                outcome.output = Some(path);
            }
        }
        Ok(outcome)
    }

    /// Runs one unit through its stages. Every failure except a fatal one
    /// is contained here; the original surface is returned untouched.
    pub async fn process_unit(&self, unit: PipelineUnit, job: &Job) -> UnitOutcome {
        let Ok(_slot) = self.slots.acquire().await else {
            return self.cancelled(unit);
        };
        if job.is_cancelled() {
            return self.cancelled(unit);
        }

        let mut machine = UnitMachine::default();
        let mut report = UnitReport {
            unit: unit.id,
            kind: unit.kind,
            state: "pending",
            error: None,
            recognition_error: None,
            retries: 0,
            regions: Vec::new(),
        };
        debug!(unit = %unit.id, kind = ?unit.kind, "unit started");

        machine.advance();
        let regions = match &unit.surface {
            Surface::Raster(image) => match self.detect(unit.id, image).await {
                Ok(regions) => regions,
                Err(err) => {
                    warn!(unit = %unit.id, "{err}");
                    report.recognition_error = Some(err);
                    Vec::new()
                }
            },
            Surface::Text(run) => structured_regions(unit.id, run),
        };
        debug!(unit = %unit.id, regions = regions.len(), "regions detected");

        machine.advance();
        let translated = match self.translate(&regions, &mut report).await {
            Ok(translated) => translated,
            Err(err) => return self.finish(unit, machine, report, job, Err(err)),
        };

        machine.advance();
        let (surface, changed) = match &unit.surface {
            Surface::Raster(image) => {
                let (image, erased) = match self.erase(image.clone(), &regions, &translated, &mut report).await {
                    Ok(done) => done,
                    Err(err) => return self.finish(unit, machine, report, job, Err(err)),
                };
                machine.advance();
                let changed = !erased.is_empty();
                match self.render(image, erased, &mut report).await {
                    Ok(image) => (Surface::Raster(image), changed),
                    Err(err) => return self.finish(unit, machine, report, job, Err(err)),
                }
            }
            Surface::Text(run) => {
                machine.advance();
                let changed = translated.iter().any(Option::is_some);
                (Surface::Text(rewrite_run(run, &translated)), changed)
            }
        };

        let mut unit = unit;
        unit.regions = regions;
        unit.surface = surface;
        self.finish(unit, machine, report, job, Ok(changed))
    }

    async fn detect(&self, unit: UnitId, image: &RgbaImage) -> Result<Vec<TextRegion>, ErrorKind> {
        let detector = Arc::clone(&self.detector);
        let image = image.clone();
        let hints = self.options.hints.clone();
        let task = tokio::task::spawn_blocking(move || detector.detect(&image, &hints));
        let raw = match tokio::time::timeout(self.options.detection_timeout, task).await {
            Err(_) => {
                return Err(ErrorKind::Recognition(format!(
                    "detection timed out after {}ms",
                    self.options.detection_timeout.as_millis()
                )));
            }
            Ok(Err(err)) => return Err(ErrorKind::Recognition(format!("detector task failed: {err}"))),
            Ok(Ok(Err(err))) => return Err(ErrorKind::Recognition(format!("{err:#}"))),
            Ok(Ok(Ok(raw))) => raw,
        };
        Ok(finalize_regions(
            unit,
            raw,
            &self.options.hints,
            self.options.confidence_threshold,
        ))
    }

    /// Sends the unit's translatable regions to the backend in one call.
    /// Returns the translation per region, `None` where it is not replaced.
    async fn translate(
        &self,
        regions: &[TextRegion],
        report: &mut UnitReport,
    ) -> Result<Vec<Option<String>>, ErrorKind> {
        let mut translated = vec![None; regions.len()];
        let mut pending = Vec::new();
        for (idx, region) in regions.iter().enumerate() {
            let status = if region.low_confidence {
                Some(RegionStatus::skipped(SkipReason::LowConfidence))
            } else if !is_translatable(&region.text) {
                Some(RegionStatus::skipped(SkipReason::NotTranslatable))
            } else {
                pending.push(idx);
                None
            };
            report.regions.push(RegionReport {
                id: region.id,
                source: region.text.clone(),
                status: status.unwrap_or(RegionStatus::Translated {
                    text: String::new(),
                }),
            });
        }
        if pending.is_empty() {
            return Ok(translated);
        }

        let segments = pending
            .iter()
            .map(|idx| regions[*idx].text.clone())
            .collect::<Vec<_>>();
        let context = self
            .options
            .use_context
            .then(|| segments.join("\n"))
            .filter(|_| segments.len() > 1);
        let outcomes = self
            .backend
            .translate_segments(&segments, &self.options.langs, context.as_deref())
            .await?;

        let mut failures = Vec::new();
        for (idx, outcome) in pending.iter().zip(outcomes) {
            report.retries += outcome.retries();
            match outcome {
                SegmentOutcome::Translated { text, .. } => {
                    report.regions[*idx].status = RegionStatus::Translated { text: text.clone() };
                    translated[*idx] = Some(text);
                }
                SegmentOutcome::Failed { error, .. } => {
                    report.regions[*idx].status = RegionStatus::Untranslated {
                        error: error.clone(),
                    };
                    failures.push(error);
                }
            }
        }
        if failures.len() == pending.len() {
            let first = failures
                .into_iter()
                .next()
                .unwrap_or_else(|| ErrorKind::Translation("no translation".into()));
            return Err(first);
        }
        Ok(translated)
    }

    /// Erases every region that has a translation. Regions that cannot be
    /// erased keep their original pixels and are not rendered.
    async fn erase(
        &self,
        image: RgbaImage,
        regions: &[TextRegion],
        translated: &[Option<String>],
        report: &mut UnitReport,
    ) -> Result<(RgbaImage, Vec<(usize, TextRegion, String)>), ErrorKind> {
        let jobs = regions
            .iter()
            .zip(translated)
            .enumerate()
            .filter_map(|(idx, (region, text))| Some((idx, region.clone(), text.clone()?)))
            .collect::<Vec<_>>();
        let eraser = Arc::clone(&self.eraser);
        let (image, results) = tokio::task::spawn_blocking(move || {
            let mut image = image;
            let results = jobs
                .into_iter()
                .map(|(idx, region, text)| {
                    let erased = eraser.erase(&mut image, &region);
                    (idx, region, text, erased)
                })
                .collect::<Vec<_>>();
            (image, results)
        })
        .await
        .map_err(|err| ErrorKind::RenderSkipped(format!("erase task failed: {err}")))?;

        let mut erased = Vec::new();
        for (idx, region, text, result) in results {
            match result {
                Ok(_) => erased.push((idx, region, text)),
                Err(err) => {
                    warn!(unit = %region.unit, region = %region.id, "{err}");
                    report.regions[idx].status = RegionStatus::Skipped {
                        reason: SkipReason::RenderSkipped,
                        detail: Some(err.to_string()),
                    };
                }
            }
        }
        Ok((image, erased))
    }

    async fn render(
        &self,
        image: RgbaImage,
        erased: Vec<(usize, TextRegion, String)>,
        report: &mut UnitReport,
    ) -> Result<RgbaImage, ErrorKind> {
        let renderer = Arc::clone(&self.renderer);
        let target = Script::for_language(&self.options.langs.target);
        let (image, results) = tokio::task::spawn_blocking(move || {
            let mut image = image;
            let results = erased
                .into_iter()
                .map(|(idx, region, text)| {
                    let rendered = renderer.render(&mut image, &region, &text, target);
                    (idx, text, rendered)
                })
                .collect::<Vec<_>>();
            (image, results)
        })
        .await
        .map_err(|err| ErrorKind::RenderSkipped(format!("render task failed: {err}")))?;

        for (idx, text, result) in results {
            report.regions[idx].status = match result {
                Ok(rendered) if rendered.overflow => RegionStatus::Overflow { text },
                Ok(_) => RegionStatus::Translated { text },
                Err(err) => {
                    let reason = match err {
                        ErrorKind::FontUnavailable(_) => SkipReason::FontUnavailable,
                        _ => SkipReason::RenderSkipped,
                    };
                    RegionStatus::Skipped {
                        reason,
                        detail: Some(err.to_string()),
                    }
                }
            };
        }
        Ok(image)
    }

    fn finish(
        &self,
        unit: PipelineUnit,
        mut machine: UnitMachine,
        mut report: UnitReport,
        job: &Job,
        result: Result<bool, ErrorKind>,
    ) -> UnitOutcome {
        match &result {
            Ok(_) => {
                machine.advance();
                debug!(unit = %unit.id, "unit done");
            }
            Err(err) => {
                machine.fail(err.clone());
                if err.is_fatal() {
                    error!(unit = %unit.id, "fatal error, cancelling job: {err}");
                    job.cancel();
                } else {
                    warn!(unit = %unit.id, "unit failed: {err}");
                }
                report.error = Some(err.clone());
            }
        }
        report.state = machine.state().name();
        let changed = result.as_ref().is_ok_and(|changed| *changed);
        job.settle(unit.id, result.map(|_| ()));
        UnitOutcome {
            report,
            surface: unit.surface,
            changed,
        }
    }

    fn cancelled(&self, unit: PipelineUnit) -> UnitOutcome {
        debug!(unit = %unit.id, "unit cancelled before start");
        UnitOutcome {
            report: UnitReport {
                unit: unit.id,
                kind: unit.kind,
                state: UnitState::Pending.name(),
                error: None,
                recognition_error: None,
                retries: 0,
                regions: Vec::new(),
            },
            surface: unit.surface,
            changed: false,
        }
    }
}

/// Replaces the run's text, keeping the whitespace around it.
fn rewrite_run(run: &TextRun, translated: &[Option<String>]) -> TextRun {
    match translated.first().cloned().flatten() {
        Some(text) => TextRun {
            text: preserve_whitespace(&run.text, &text),
            attributes: run.attributes.clone(),
        },
        None => run.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{FakeEngine, fast_config};
    use crate::backend::{BackendConfig, TranslationCache};
    use crate::compose::RenderReport;
    use crate::detect::RawRegion;
    use crate::engines::Engine;
    use crate::erase::Eraser;
    use crate::error::EngineError;
    use crate::settings::ErasureMethod;
    use crate::unit::{BBoxPx, Geometry, UnitKind};
    use anyhow::anyhow;
    use image::Rgba;

    struct FakeDetector {
        regions: Vec<RawRegion>,
        delay: Duration,
        fail: bool,
    }

    impl FakeDetector {
        fn new(regions: Vec<(&str, BBoxPx, f32)>) -> Self {
            Self {
                regions: regions
                    .into_iter()
                    .map(|(text, bbox, confidence)| RawRegion {
                        geometry: Geometry::from_bbox(bbox),
                        text: text.to_string(),
                        confidence,
                        orientation: None,
                    })
                    .collect(),
                delay: Duration::ZERO,
                fail: false,
            }
        }
    }

    impl TextDetector for FakeDetector {
        fn detect(&self, _image: &RgbaImage, _hints: &[String]) -> anyhow::Result<Vec<RawRegion>> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.fail {
                return Err(anyhow!("tesseract exited with status 1"));
            }
            Ok(self.regions.clone())
        }
    }

    /// Fills the region with a flat colour instead of drawing glyphs.
    struct FakeRenderer;

    impl RegionRenderer for FakeRenderer {
        fn render(
            &self,
            image: &mut RgbaImage,
            region: &TextRegion,
            text: &str,
            _target: Script,
        ) -> Result<RenderReport, ErrorKind> {
            if text.contains("Missing") {
                return Err(ErrorKind::FontUnavailable("han".into()));
            }
            let bbox = region.geometry.bbox;
            for y in bbox.y..bbox.bottom() {
                for x in bbox.x..bbox.right() {
                    image.put_pixel(x, y, Rgba([1, 2, 3, 255]));
                }
            }
            Ok(RenderReport {
                family: "Fake".into(),
                font_size: 12.0,
                lines: 1,
                overflow: text.chars().count() > 20,
            })
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            langs: LanguagePair::new("en", "zh-CN"),
            hints: vec!["eng".into()],
            worker_pool_size: 2,
            confidence_threshold: 0.5,
            detection_timeout: Duration::from_secs(5),
            use_context: false,
        }
    }

    fn pipeline(detector: FakeDetector, engine: FakeEngine, config: BackendConfig) -> Pipeline {
        let backend = TranslationBackend::new(
            Engine::Single(Arc::new(engine)),
            Arc::new(TranslationCache::new(100)),
            config,
        );
        Pipeline::new(
            Arc::new(detector),
            Arc::new(backend),
            Arc::new(Eraser::new(ErasureMethod::Fast)),
            Arc::new(FakeRenderer),
            options(),
        )
    }

    fn raster_unit() -> PipelineUnit {
        let image = RgbaImage::from_pixel(200, 100, Rgba([240, 240, 240, 255]));
        PipelineUnit::new(
            UnitId {
                document: 0,
                index: 0,
            },
            UnitKind::Image,
            Surface::Raster(image),
        )
    }

    fn raster(outcome: &UnitOutcome) -> &RgbaImage {
        match &outcome.surface {
            Surface::Raster(image) => image,
            Surface::Text(_) => panic!("expected a raster surface"),
        }
    }

    #[tokio::test]
    async fn raster_unit_reports_every_region() {
        let detector = FakeDetector::new(vec![
            ("Hello", BBoxPx::new(10, 10, 80, 20), 0.9),
            ("42", BBoxPx::new(10, 40, 30, 20), 0.9),
            ("Blurry", BBoxPx::new(10, 70, 80, 20), 0.2),
        ]);
        let pipeline = pipeline(detector, FakeEngine::new("basic"), fast_config());
        let job = Job::new();
        let unit = raster_unit();
        job.register(&[unit.id]);
        let outcome = pipeline.process_unit(unit, &job).await;

        assert_eq!(outcome.report.state, "done");
        let statuses = outcome
            .report
            .regions
            .iter()
            .map(|region| region.status.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                RegionStatus::Translated {
                    text: "[zh-CN] Hello".into()
                },
                RegionStatus::skipped(SkipReason::NotTranslatable),
                RegionStatus::skipped(SkipReason::LowConfidence),
            ]
        );
        let image = raster(&outcome);
        assert_eq!(image.get_pixel(20, 15), &Rgba([1, 2, 3, 255]));
        assert_eq!(image.get_pixel(20, 75), &Rgba([240, 240, 240, 255]));
        assert!(outcome.changed);
        assert_eq!(job.progress().completed, 1);
    }

    #[tokio::test]
    async fn detector_failure_leaves_unit_done_without_regions() {
        let mut detector = FakeDetector::new(vec![("Hello", BBoxPx::new(10, 10, 80, 20), 0.9)]);
        detector.fail = true;
        let pipeline = pipeline(detector, FakeEngine::new("basic"), fast_config());
        let outcome = pipeline.process_unit(raster_unit(), &Job::new()).await;

        assert_eq!(outcome.report.state, "done");
        assert!(outcome.report.regions.is_empty());
        assert!(!outcome.changed);
        assert!(matches!(
            outcome.report.recognition_error,
            Some(ErrorKind::Recognition(_))
        ));
    }

    #[tokio::test]
    async fn slow_detection_times_out() {
        let mut detector = FakeDetector::new(vec![("Hello", BBoxPx::new(10, 10, 80, 20), 0.9)]);
        detector.delay = Duration::from_millis(300);
        let mut pipeline = pipeline(detector, FakeEngine::new("basic"), fast_config());
        pipeline.options.detection_timeout = Duration::from_millis(20);
        let outcome = pipeline.process_unit(raster_unit(), &Job::new()).await;

        assert_eq!(outcome.report.state, "done");
        let Some(ErrorKind::Recognition(message)) = &outcome.report.recognition_error else {
            panic!("expected a recognition error");
        };
        assert!(message.contains("timed out"));
    }

    #[tokio::test]
    async fn unit_fails_when_every_region_is_untranslated() {
        let detector = FakeDetector::new(vec![("Hello", BBoxPx::new(10, 10, 80, 20), 0.9)]);
        let engine = FakeEngine::new("basic").fail_with(vec![EngineError::permanent("HTTP 403")]);
        let pipeline = pipeline(detector, engine, fast_config());
        let job = Job::new();
        let unit = raster_unit();
        job.register(&[unit.id]);
        let outcome = pipeline.process_unit(unit, &job).await;

        assert_eq!(outcome.report.state, "failed");
        assert!(!outcome.changed);
        assert!(matches!(outcome.report.error, Some(ErrorKind::Translation(_))));
        assert!(
            raster(&outcome)
                .pixels()
                .all(|pixel| *pixel == Rgba([240, 240, 240, 255]))
        );
        assert_eq!(job.status(outcome.report.unit), Some(UnitStatus::Failed));
    }

    #[tokio::test]
    async fn missing_font_leaves_region_erased() {
        let detector = FakeDetector::new(vec![("Missing glyphs", BBoxPx::new(10, 10, 80, 20), 0.9)]);
        let pipeline = pipeline(detector, FakeEngine::new("basic"), fast_config());
        let outcome = pipeline.process_unit(raster_unit(), &Job::new()).await;

        assert_eq!(outcome.report.state, "done");
        assert!(outcome.changed);
        assert!(matches!(
            outcome.report.regions[0].status,
            RegionStatus::Skipped {
                reason: SkipReason::FontUnavailable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn text_unit_keeps_surrounding_whitespace() {
        let detector = FakeDetector::new(Vec::new());
        let pipeline = pipeline(detector, FakeEngine::new("basic"), fast_config());
        let unit = PipelineUnit::new(
            UnitId {
                document: 0,
                index: 3,
            },
            UnitKind::ParagraphRun,
            Surface::Text(TextRun::new(" Hello world ").with_attribute("tag", "w:t")),
        );
        let outcome = pipeline.process_unit(unit, &Job::new()).await;

        assert_eq!(outcome.report.state, "done");
        let Surface::Text(run) = &outcome.surface else {
            panic!("expected a text surface");
        };
        assert_eq!(run.text, " [zh-CN] Hello world ");
        assert_eq!(run.attributes.get("tag").map(String::as_str), Some("w:t"));
    }

    #[tokio::test]
    async fn cancelled_job_leaves_units_pending() {
        let detector = FakeDetector::new(vec![("Hello", BBoxPx::new(10, 10, 80, 20), 0.9)]);
        let pipeline = pipeline(detector, FakeEngine::new("basic"), fast_config());
        let job = Job::new();
        job.cancel();
        let outcome = pipeline.process_unit(raster_unit(), &job).await;

        assert_eq!(outcome.report.state, "pending");
        assert!(outcome.report.regions.is_empty());
    }
}
