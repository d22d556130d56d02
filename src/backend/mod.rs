use futures_util::future::{join, join_all};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engines::{Engine, EngineRequest, LanguagePair, TranslationEngine};
use crate::error::{EngineError, ErrorKind};
use crate::settings::Settings;

pub mod cache;
pub mod limiter;
pub mod retry;

pub use cache::{CacheKey, TranslationCache};
pub use limiter::RateLimiter;
pub use retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub retry: RetryPolicy,
    /// Per engine call.
    pub timeout: Duration,
    pub batch_size: usize,
    pub max_outstanding: usize,
    pub rate_limit_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            batch_size: 25,
            max_outstanding: 4,
            rate_limit_interval: Duration::from_millis(200),
        }
    }
}

impl BackendConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry: RetryPolicy {
                ceiling: settings.retry_ceiling.max(1),
                base_delay: settings.retry_base_delay,
                max_delay: settings.retry_max_delay,
            },
            timeout: settings.translation_timeout,
            batch_size: settings.batch_size.max(1),
            max_outstanding: settings.max_outstanding.max(1),
            rate_limit_interval: settings.rate_limit_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Engine,
    Cache,
    /// Shared the result of a request already in flight.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Translated {
        text: String,
        engine_id: String,
        source: ResultSource,
        retries: u32,
    },
    Failed {
        error: ErrorKind,
        retries: u32,
    },
}

impl SegmentOutcome {
    pub fn retries(&self) -> u32 {
        match self {
            SegmentOutcome::Translated { retries, .. } | SegmentOutcome::Failed { retries, .. } => {
                *retries
            }
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            SegmentOutcome::Translated { text, .. } => Some(text),
            SegmentOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub engine_calls: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub retries: u64,
    pub fallbacks: u64,
}

#[derive(Default)]
struct Counters {
    engine_calls: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

type Resolved = Result<(String, String), ErrorKind>;
type FlightMap = HashMap<CacheKey, watch::Sender<Option<Resolved>>>;

/// Translation front door: cache, in-flight coalescing, batching, retry,
/// tier fallback and per-engine rate limiting.
pub struct TranslationBackend {
    engine: Engine,
    cache: Arc<TranslationCache>,
    config: BackendConfig,
    limiters: HashMap<String, RateLimiter>,
    in_flight: Mutex<FlightMap>,
    counters: Counters,
}

/// One distinct text of a request and the positions it occupies.
struct Group {
    text: String,
    key: CacheKey,
    tiers: Vec<Arc<dyn TranslationEngine>>,
    members: Vec<usize>,
}

enum Claim<'a> {
    Hit(String),
    Wait(watch::Receiver<Option<Resolved>>),
    Owner(FlightGuard<'a>),
}

/// Marks a key as being translated. Dropping it without `finish` releases
/// waiters so they can try again.
struct FlightGuard<'a> {
    backend: &'a TranslationBackend,
    key: CacheKey,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(mut self, result: Resolved) {
        self.finished = true;
        let sender = self.backend.flights().remove(&self.key);
        if let Some(sender) = sender {
            sender.send_replace(Some(result));
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.backend.flights().remove(&self.key);
        }
    }
}

impl TranslationBackend {
    pub fn new(engine: Engine, cache: Arc<TranslationCache>, config: BackendConfig) -> Self {
        let limiters = engine
            .engines()
            .iter()
            .map(|tier| {
                (
                    tier.id().to_string(),
                    RateLimiter::new(config.max_outstanding, config.rate_limit_interval),
                )
            })
            .collect();
        Self {
            engine,
            cache,
            config,
            limiters,
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn stats(&self) -> BackendStats {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BackendStats {
            engine_calls: read(&self.counters.engine_calls),
            cache_hits: read(&self.counters.cache_hits),
            coalesced: read(&self.counters.coalesced),
            retries: read(&self.counters.retries),
            fallbacks: read(&self.counters.fallbacks),
        }
    }

    /// Translates one text. Only for callers without batching needs.
    pub async fn translate(&self, text: &str, langs: &LanguagePair) -> Result<String, ErrorKind> {
        let outcomes = self
            .translate_segments(&[text.to_string()], langs, None)
            .await?;
        match outcomes.into_iter().next() {
            Some(SegmentOutcome::Translated { text, .. }) => Ok(text),
            Some(SegmentOutcome::Failed { error, .. }) => Err(error),
            None => Err(ErrorKind::Translation("no outcome for segment".into())),
        }
    }

    /// Translates `segments`, returning one outcome per input in order.
    /// The outer error is reserved for `ErrorKind::Fatal`; per-segment
    /// failures are reported as `SegmentOutcome::Failed`.
    pub async fn translate_segments(
        &self,
        segments: &[String],
        langs: &LanguagePair,
        context: Option<&str>,
    ) -> Result<Vec<SegmentOutcome>, ErrorKind> {
        let groups = self.group(segments, langs);
        let mut resolved: Vec<Option<(Resolved, ResultSource, u32)>> = vec![None; groups.len()];
        let mut owners = Vec::new();
        let mut waiters = Vec::new();

        for (index, group) in groups.iter().enumerate() {
            match self.claim(&group.key)? {
                Claim::Hit(text) => {
                    Counters::bump(&self.counters.cache_hits, 1);
                    debug!(engine = %group.key.engine_id, "cache hit");
                    resolved[index] = Some((
                        Ok((text, group.key.engine_id.clone())),
                        ResultSource::Cache,
                        0,
                    ));
                }
                Claim::Wait(receiver) => waiters.push((index, receiver)),
                Claim::Owner(guard) => owners.push((index, guard)),
            }
        }

        let owned = self.run_owned(&groups, owners, langs, context);
        let waited = join_all(waiters.into_iter().map(|(index, receiver)| {
            let group = &groups[index];
            async move { (index, self.await_flight(group, receiver, langs, context).await) }
        }));
        let (owned, waited) = join(owned, waited).await;

        for (index, result, retries) in owned? {
            resolved[index] = Some((result, ResultSource::Engine, retries));
        }
        for (index, result) in waited {
            resolved[index] = Some(result?);
        }

        let mut outcomes = vec![None; segments.len()];
        for (group, slot) in groups.iter().zip(resolved) {
            let (result, source, retries) =
                slot.unwrap_or((Err(missing_result()), ResultSource::Engine, 0));
            for (position, member) in group.members.iter().enumerate() {
                let source = if position == 0 {
                    source
                } else {
                    Counters::bump(&self.counters.coalesced, 1);
                    ResultSource::Coalesced
                };
                outcomes[*member] = Some(to_outcome(&result, source, retries));
            }
        }
        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or(SegmentOutcome::Failed {
                    error: missing_result(),
                    retries: 0,
                })
            })
            .collect())
    }

    fn group(&self, segments: &[String], langs: &LanguagePair) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut by_key: HashMap<CacheKey, usize> = HashMap::new();
        for (index, text) in segments.iter().enumerate() {
            let tiers = self.engine.route(text);
            let primary = tiers.first().map(|tier| tier.id()).unwrap_or_default();
            let key = CacheKey::new(text, &langs.source, &langs.target, primary);
            if let Some(existing) = by_key.get(&key) {
                groups[*existing].members.push(index);
                continue;
            }
            by_key.insert(key.clone(), groups.len());
            groups.push(Group {
                text: text.clone(),
                key,
                tiers,
                members: vec![index],
            });
        }
        groups
    }

    fn flights(&self) -> MutexGuard<'_, FlightMap> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, key: &CacheKey) -> Result<Claim<'_>, ErrorKind> {
        let mut flights = self.flights();
        if let Some(sender) = flights.get(key) {
            return Ok(Claim::Wait(sender.subscribe()));
        }
        // Owners insert into the cache before leaving the map, so checking
        // under the same lock cannot miss a finished flight.
        if let Some(text) = self.cache.get(key)? {
            return Ok(Claim::Hit(text));
        }
        let (sender, _) = watch::channel(None);
        flights.insert(key.clone(), sender);
        Ok(Claim::Owner(FlightGuard {
            backend: self,
            key: key.clone(),
            finished: false,
        }))
    }

    async fn await_flight(
        &self,
        group: &Group,
        mut receiver: watch::Receiver<Option<Resolved>>,
        langs: &LanguagePair,
        context: Option<&str>,
    ) -> Result<(Resolved, ResultSource, u32), ErrorKind> {
        loop {
            let shared = match receiver.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };
            if let Some(result) = shared {
                Counters::bump(&self.counters.coalesced, 1);
                return Ok((result, ResultSource::Coalesced, 0));
            }
            // The owner went away without a result; claim again.
            match self.claim(&group.key)? {
                Claim::Hit(text) => {
                    Counters::bump(&self.counters.cache_hits, 1);
                    return Ok((Ok((text, group.key.engine_id.clone())), ResultSource::Cache, 0));
                }
                Claim::Wait(next) => receiver = next,
                Claim::Owner(guard) => {
                    let mut owned = self
                        .translate_owned(&group.tiers, vec![group.text.clone()], langs, context)
                        .await?;
                    let (result, retries) = owned
                        .pop()
                        .unwrap_or((Err(missing_result()), 0));
                    guard.finish(result.clone());
                    return Ok((result, ResultSource::Engine, retries));
                }
            }
        }
    }

    /// Translates every owned group, batching groups that share a tier
    /// sequence, and publishes each result to waiters.
    async fn run_owned(
        &self,
        groups: &[Group],
        owners: Vec<(usize, FlightGuard<'_>)>,
        langs: &LanguagePair,
        context: Option<&str>,
    ) -> Result<Vec<(usize, Resolved, u32)>, ErrorKind> {
        let mut by_route: Vec<(Vec<String>, Vec<(usize, FlightGuard<'_>)>)> = Vec::new();
        for (index, guard) in owners {
            let route = groups[index]
                .tiers
                .iter()
                .map(|tier| tier.id().to_string())
                .collect::<Vec<_>>();
            match by_route.iter_mut().find(|(ids, _)| *ids == route) {
                Some((_, members)) => members.push((index, guard)),
                None => by_route.push((route, vec![(index, guard)])),
            }
        }

        let routes = join_all(by_route.into_iter().map(|(_, members)| async move {
            let Some((first, _)) = members.first() else {
                return Ok(Vec::new());
            };
            let tiers = groups[*first].tiers.clone();
            let texts = members
                .iter()
                .map(|(index, _)| groups[*index].text.clone())
                .collect::<Vec<_>>();
            let results = self.translate_owned(&tiers, texts, langs, context).await?;
            let mut out = Vec::with_capacity(members.len());
            for ((index, guard), (result, retries)) in members.into_iter().zip(results) {
                guard.finish(result.clone());
                out.push((index, result, retries));
            }
            Ok::<_, ErrorKind>(out)
        }))
        .await;

        let mut out = Vec::new();
        for route in routes {
            out.extend(route?);
        }
        Ok(out)
    }

    /// Walks the tier list until every text has a translation or all tiers
    /// are exhausted. Values are cached under the tier that produced them.
    async fn translate_owned(
        &self,
        tiers: &[Arc<dyn TranslationEngine>],
        texts: Vec<String>,
        langs: &LanguagePair,
        context: Option<&str>,
    ) -> Result<Vec<(Resolved, u32)>, ErrorKind> {
        let mut results: Vec<Option<Resolved>> = vec![None; texts.len()];
        let mut retries = vec![0u32; texts.len()];
        let mut last_error: Vec<Option<String>> = vec![None; texts.len()];

        for (tier_index, tier) in tiers.iter().enumerate() {
            let mut pending: Vec<usize> = (0..texts.len())
                .filter(|index| results[*index].is_none())
                .collect();
            if pending.is_empty() {
                break;
            }
            if tier_index > 0 {
                Counters::bump(&self.counters.fallbacks, pending.len() as u64);
                warn!(
                    engine = tier.id(),
                    segments = pending.len(),
                    "falling back to next engine tier"
                );
                pending.retain(|index| {
                    let key = CacheKey::new(&texts[*index], &langs.source, &langs.target, tier.id());
                    match self.cache.get(&key) {
                        Ok(Some(text)) => {
                            results[*index] = Some(Ok((text, tier.id().to_string())));
                            false
                        }
                        _ => true,
                    }
                });
            }

            let calls = self.call_tier(tier.as_ref(), &texts, &pending, langs, context).await;
            for (indices, result, attempts) in calls {
                for index in &indices {
                    retries[*index] += attempts;
                }
                match result {
                    Ok(translated) => {
                        for (index, text) in indices.into_iter().zip(translated) {
                            let key = CacheKey::new(
                                &texts[index],
                                &langs.source,
                                &langs.target,
                                tier.id(),
                            );
                            let stored = self.cache.insert(key, text)?;
                            results[index] = Some(Ok((stored, tier.id().to_string())));
                        }
                    }
                    Err(err) => {
                        warn!(engine = tier.id(), "engine tier failed: {}", err);
                        for index in indices {
                            last_error[index] = Some(format!("{}: {}", tier.id(), err));
                        }
                    }
                }
            }
        }

        Ok(results
            .into_iter()
            .zip(retries)
            .zip(last_error)
            .map(|((result, retries), last)| {
                let result = result.unwrap_or_else(|| {
                    Err(ErrorKind::Translation(
                        last.unwrap_or_else(|| "no engine tier available".to_string()),
                    ))
                });
                (result, retries)
            })
            .collect())
    }

    /// Issues the calls for one tier: batches when the engine accepts them,
    /// one call per text otherwise. Calls run concurrently; the rate limiter
    /// queues whatever exceeds the engine's budget.
    async fn call_tier(
        &self,
        tier: &dyn TranslationEngine,
        texts: &[String],
        pending: &[usize],
        langs: &LanguagePair,
        context: Option<&str>,
    ) -> Vec<(Vec<usize>, Result<Vec<String>, EngineError>, u32)> {
        let chunk_size = if tier.supports_batch() {
            self.config.batch_size.max(1)
        } else {
            1
        };
        let calls = pending.chunks(chunk_size).map(|chunk| async move {
            let request = EngineRequest {
                segments: chunk.iter().map(|index| texts[*index].clone()).collect(),
                langs: langs.clone(),
                context: context.map(str::to_string),
            };
            let (result, retries) = self.call_with_retry(tier, request).await;
            (chunk.to_vec(), result, retries)
        });
        join_all(calls).await
    }

    async fn call_with_retry(
        &self,
        tier: &dyn TranslationEngine,
        request: EngineRequest,
    ) -> (Result<Vec<String>, EngineError>, u32) {
        let policy = &self.config.retry;
        let seed = request.segments.join("\u{1f}");
        let expected = request.segments.len();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.call_once(tier, request.clone()).await.and_then(|out| {
                if out.len() == expected {
                    Ok(out)
                } else {
                    Err(EngineError::transient(format!(
                        "{} returned {} translations for {} segments",
                        tier.id(),
                        out.len(),
                        expected
                    )))
                }
            });
            match result {
                Ok(out) => return (Ok(out), attempt - 1),
                Err(err) if err.is_transient() && attempt < policy.ceiling => {
                    let delay = policy.delay_for(attempt, &seed, err.retry_after);
                    Counters::bump(&self.counters.retries, 1);
                    warn!(
                        engine = tier.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient engine failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return (Err(err), attempt - 1),
            }
        }
    }

    async fn call_once(
        &self,
        tier: &dyn TranslationEngine,
        request: EngineRequest,
    ) -> Result<Vec<String>, EngineError> {
        let _permit = match self.limiters.get(tier.id()) {
            Some(limiter) => Some(limiter.acquire().await?),
            None => None,
        };
        Counters::bump(&self.counters.engine_calls, 1);
        match tokio::time::timeout(self.config.timeout, tier.translate(request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::timeout(self.config.timeout)),
        }
    }
}

fn to_outcome(result: &Resolved, source: ResultSource, retries: u32) -> SegmentOutcome {
    match result {
        Ok((text, engine_id)) => SegmentOutcome::Translated {
            text: text.clone(),
            engine_id: engine_id.clone(),
            source,
            retries,
        },
        Err(error) => SegmentOutcome::Failed {
            error: error.clone(),
            retries,
        },
    }
}

fn missing_result() -> ErrorKind {
    ErrorKind::Translation("no result produced for segment".into())
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeEngine, fast_config};
    use super::*;
    use crate::engines::HybridRouter;

    fn backend_with(engine: Arc<FakeEngine>, config: BackendConfig) -> TranslationBackend {
        TranslationBackend::new(
            Engine::Single(engine),
            Arc::new(TranslationCache::new(100)),
            config,
        )
    }

    fn en_zh() -> LanguagePair {
        LanguagePair::new("en", "zh-CN")
    }

    #[tokio::test]
    async fn expired_entry_is_refreshed_once() {
        let engine = Arc::new(FakeEngine::new("basic"));
        let cache = Arc::new(TranslationCache::new(100).with_max_age(Some(Duration::from_secs(60))));
        let backend = TranslationBackend::new(Engine::Single(engine.clone()), cache.clone(), fast_config());

        backend.translate("Hello", &en_zh()).await.unwrap();
        cache.backdate(120);
        for _ in 0..3 {
            assert_eq!(backend.translate("Hello", &en_zh()).await.unwrap(), "[zh-CN] Hello");
        }
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn second_identical_request_is_served_from_cache() {
        let engine = Arc::new(FakeEngine::new("basic"));
        let backend = backend_with(engine.clone(), fast_config());

        let first = backend.translate("Hello", &en_zh()).await.unwrap();
        let second = backend.translate("Hello", &en_zh()).await.unwrap();
        assert_eq!(first, "[zh-CN] Hello");
        assert_eq!(first, second);
        assert_eq!(engine.calls(), 1);
        assert_eq!(backend.stats().cache_hits, 1);

        let key = CacheKey::new("hello", "en", "zh-CN", "basic");
        assert_eq!(backend.cache().get(&key).unwrap().as_deref(), Some("[zh-CN] Hello"));
    }

    #[tokio::test]
    async fn engines_do_not_share_cache_entries() {
        let cache = Arc::new(TranslationCache::new(100));
        let basic = Arc::new(FakeEngine::new("basic"));
        let premium = Arc::new(FakeEngine::new("premium"));
        let first = TranslationBackend::new(Engine::Single(basic.clone()), cache.clone(), fast_config());
        let second = TranslationBackend::new(Engine::Single(premium.clone()), cache.clone(), fast_config());

        first.translate("Hello", &en_zh()).await.unwrap();
        second.translate("Hello", &en_zh()).await.unwrap();
        assert_eq!(basic.calls(), 1);
        assert_eq!(premium.calls(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn duplicates_in_one_request_cost_one_call() {
        let engine = Arc::new(FakeEngine::new("basic"));
        let backend = backend_with(engine.clone(), fast_config());
        let segments = vec!["Hello".to_string(), "World".to_string(), "Hello".to_string()];

        let outcomes = backend.translate_segments(&segments, &en_zh(), None).await.unwrap();
        assert_eq!(engine.calls(), 2);
        assert_eq!(outcomes[0].text(), outcomes[2].text());
        assert!(matches!(
            outcomes[2],
            SegmentOutcome::Translated { source: ResultSource::Coalesced, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_onto_one_call() {
        let engine = Arc::new(FakeEngine::new("basic").with_delay(Duration::from_millis(50)));
        let backend = Arc::new(backend_with(engine.clone(), fast_config()));

        let tasks = (0..5)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.translate("Hello", &en_zh()).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "[zh-CN] Hello");
        }
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn batching_engine_gets_chunks() {
        let engine = Arc::new(FakeEngine::new("premium").batching());
        let mut config = fast_config();
        config.batch_size = 2;
        let backend = backend_with(engine.clone(), config);
        let segments = (0..5).map(|n| format!("line {}", n)).collect::<Vec<_>>();

        let outcomes = backend.translate_segments(&segments, &en_zh(), None).await.unwrap();
        assert_eq!(engine.calls(), 3);
        for (segment, outcome) in segments.iter().zip(&outcomes) {
            assert_eq!(outcome.text(), Some(format!("[zh-CN] {}", segment).as_str()));
        }
    }

    #[tokio::test]
    async fn timeout_then_success_records_a_retry() {
        let engine = Arc::new(
            FakeEngine::new("basic").fail_with(vec![EngineError::timeout(Duration::from_millis(5))]),
        );
        let backend = backend_with(engine.clone(), fast_config());

        let outcomes = backend
            .translate_segments(&["Hello".to_string()], &en_zh(), None)
            .await
            .unwrap();
        assert_eq!(outcomes[0].text(), Some("[zh-CN] Hello"));
        assert_eq!(outcomes[0].retries(), 1);
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn slow_engine_hits_the_call_timeout() {
        let engine = Arc::new(FakeEngine::new("basic").with_delay(Duration::from_millis(200)));
        let mut config = fast_config();
        config.timeout = Duration::from_millis(20);
        config.retry.ceiling = 2;
        let backend = backend_with(engine.clone(), config);

        let err = backend.translate("Hello", &en_zh()).await.unwrap_err();
        assert!(matches!(err, ErrorKind::Translation(ref message) if message.contains("timed out")));
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let engine = Arc::new(
            FakeEngine::new("basic").fail_with(vec![EngineError::permanent("bad key")]),
        );
        let backend = backend_with(engine.clone(), fast_config());

        let err = backend.translate("Hello", &en_zh()).await.unwrap_err();
        assert_eq!(err, ErrorKind::Translation("basic: bad key".into()));
        assert_eq!(engine.calls(), 1);
        assert!(backend.cache().is_empty());
    }

    #[tokio::test]
    async fn hybrid_falls_back_and_caches_under_the_fallback() {
        let basic = Arc::new(FakeEngine::new("basic").fail_with(vec![
            EngineError::transient("503"),
            EngineError::transient("503"),
            EngineError::transient("503"),
        ]));
        let premium = Arc::new(FakeEngine::new("premium").batching());
        let router = HybridRouter::new(basic.clone(), vec![premium.clone()], 50, 3);
        let backend = TranslationBackend::new(
            Engine::Hybrid(router),
            Arc::new(TranslationCache::new(100)),
            fast_config(),
        );

        let outcomes = backend
            .translate_segments(&["Hi".to_string()], &en_zh(), None)
            .await
            .unwrap();
        match &outcomes[0] {
            SegmentOutcome::Translated { engine_id, retries, .. } => {
                assert_eq!(engine_id, "premium");
                assert_eq!(*retries, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(basic.calls(), 3);
        assert_eq!(premium.calls(), 1);
        assert_eq!(backend.stats().fallbacks, 1);
        let fallback_key = CacheKey::new("Hi", "en", "zh-CN", "premium");
        assert!(backend.cache().get(&fallback_key).unwrap().is_some());
    }

    #[tokio::test]
    async fn unwritable_cache_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone").join("cache.jsonl");
        // The journal directory does not exist, so the first append fails.
        let cache = Arc::new(TranslationCache::load(&missing, 10, None).unwrap());
        let engine = Arc::new(FakeEngine::new("basic"));
        let backend = TranslationBackend::new(Engine::Single(engine), cache, fast_config());

        let err = backend
            .translate_segments(&["Hello".to_string()], &en_zh(), None)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
