//! Group analysis engine.
//!
//! Resolves the members of an index or industry, analyzes them concurrently
//! on a bounded pool of tokio tasks, and aggregates the survivors into a
//! cached [`GroupSummary`].

use super::aggregator::{rank_snapshots, select_members, summarize};
use super::cache::TtlCache;
use super::scorer::EntityAnalyzer;
use crate::config::AnalysisSettings;
use crate::error::{AnalysisError, DataError};
use crate::facade::DataFacade;
use crate::models::{
    EntityAnalysis, GroupComparison, GroupKey, GroupKind, GroupMember, GroupSnapshot,
    GroupSummary,
};
use anyhow::anyhow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub cache_ttl: Duration,
    /// Members analyzed per group when the caller gives no limit (0 = all).
    pub member_limit: usize,
    pub concurrency: usize,
    pub member_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&AnalysisSettings::default())
    }
}

impl From<&AnalysisSettings> for EngineConfig {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            cache_ttl: Duration::from_secs(settings.cache_ttl_seconds),
            member_limit: settings.member_limit,
            concurrency: settings.concurrency.max(1),
            member_timeout: (settings.member_timeout_seconds > 0)
                .then(|| Duration::from_secs(settings.member_timeout_seconds)),
        }
    }
}

pub struct AggregationEngine {
    facade: Arc<DataFacade>,
    analyzer: Arc<dyn EntityAnalyzer>,
    indices: BTreeMap<String, String>,
    config: EngineConfig,
    cache: TtlCache<GroupKey, GroupSummary>,
    pool: Arc<Semaphore>,
}

impl AggregationEngine {
    /// `indices` maps every supported index code to its display name.
    pub fn new(
        facade: Arc<DataFacade>,
        analyzer: Arc<dyn EntityAnalyzer>,
        indices: BTreeMap<String, String>,
        config: EngineConfig,
    ) -> Self {
        Self {
            facade,
            analyzer,
            indices,
            cache: TtlCache::new(config.cache_ttl),
            pool: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    pub async fn analyze_index(
        &self,
        code: &str,
        limit: Option<usize>,
    ) -> Result<GroupSummary, AnalysisError> {
        self.analyze_group(GroupKey::index(code), limit).await
    }

    pub async fn analyze_industry(
        &self,
        name: &str,
        limit: Option<usize>,
    ) -> Result<GroupSummary, AnalysisError> {
        self.analyze_group(GroupKey::industry(name), limit).await
    }

    /// Summary for a group, served from cache while fresh.
    ///
    /// Concurrent calls for the same group share one computation.
    pub async fn analyze_group(
        &self,
        group: GroupKey,
        limit: Option<usize>,
    ) -> Result<GroupSummary, AnalysisError> {
        let evicted = self.cache.evict_expired();
        if evicted > 0 {
            debug!("Evicted {} stale group summaries", evicted);
        }

        let limit = limit.unwrap_or(self.config.member_limit);
        self.cache
            .get_or_try_insert_with(group.clone(), || self.compute(group, limit))
            .await
    }

    /// Drop cached summaries so the next call recomputes.
    #[allow(dead_code)] // For long-running embedders
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn compute(&self, group: GroupKey, limit: usize) -> Result<GroupSummary, AnalysisError> {
        let (name, members) = self.resolve(&group).await?;
        let total = members.len();
        let selected = select_members(members, limit);

        info!(
            "Analyzing {} ({} of {} members)",
            group,
            selected.len(),
            total
        );

        let attempted = selected.len();
        let results = self.analyze_members(selected).await;
        if results.is_empty() {
            return Err(AnalysisError::NoResults(group));
        }
        if results.len() < attempted {
            warn!(
                "{}: {} of {} member analyses failed",
                group,
                attempted - results.len(),
                attempted
            );
        }

        let summary = summarize(group, name, results);
        info!(
            "{} score {:.2}, {} up / {} down / {} flat",
            summary.group, summary.score, summary.up_count, summary.down_count, summary.flat_count
        );
        Ok(summary)
    }

    async fn resolve(
        &self,
        group: &GroupKey,
    ) -> Result<(Option<String>, Vec<GroupMember>), AnalysisError> {
        let resolution = |source: DataError| AnalysisError::Resolution {
            group: group.clone(),
            source,
        };

        let (name, members) = match group.kind {
            GroupKind::Index => {
                let name = self
                    .indices
                    .get(&group.id)
                    .cloned()
                    .ok_or_else(|| AnalysisError::UnknownGroup(group.clone()))?;
                let members = self
                    .facade
                    .group_members(&group.id)
                    .await
                    .map_err(resolution)?;
                (Some(name), members)
            }
            GroupKind::Industry => {
                let codes = self
                    .facade
                    .industry_members(&group.id)
                    .await
                    .map_err(resolution)?;
                (None, codes.into_iter().map(GroupMember::new).collect())
            }
        };

        if members.is_empty() {
            return Err(AnalysisError::NoMembers(group.clone()));
        }
        Ok((name, members))
    }

    /// Analyze members concurrently. Failed, timed out or panicked members
    /// are logged and left out; the rest keep member order.
    async fn analyze_members(&self, members: Vec<GroupMember>) -> Vec<EntityAnalysis> {
        let mut tasks = JoinSet::new();

        for (position, member) in members.into_iter().enumerate() {
            let analyzer = Arc::clone(&self.analyzer);
            let pool = Arc::clone(&self.pool);
            let deadline = self.config.member_timeout;

            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await.ok()?;

                let analysis = analyzer.analyze(&member.entity_id);
                let outcome = match deadline {
                    Some(limit) => tokio::time::timeout(limit, analysis)
                        .await
                        .unwrap_or_else(|_| Err(anyhow!("timed out after {:?}", limit))),
                    None => analysis.await,
                };

                match outcome {
                    Ok(mut analysis) => {
                        analysis.weight = member.effective_weight();
                        Some((position, analysis))
                    }
                    Err(e) => {
                        warn!("Failed to analyze {}: {:#}", member.entity_id, e);
                        None
                    }
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => warn!("Member analysis task aborted: {}", e),
            }
        }

        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, analysis)| analysis).collect()
    }

    /// Rank every industry by its latest daily change.
    ///
    /// Industries whose snapshot fails are skipped with a warning.
    pub async fn compare_industries(&self, limit: usize) -> Result<GroupComparison, AnalysisError> {
        let industries = self.facade.industry_list().await?;
        if industries.is_empty() {
            return Err(AnalysisError::NoGroups);
        }

        info!("Comparing {} industries", industries.len());

        let mut tasks = JoinSet::new();
        for (position, industry) in industries.into_iter().enumerate() {
            let facade = Arc::clone(&self.facade);
            let pool = Arc::clone(&self.pool);

            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await.ok()?;
                match facade.industry_snapshot(&industry).await {
                    Ok(snapshot) => Some((position, snapshot)),
                    Err(e) => {
                        warn!("Skipping industry {}: {}", industry, e);
                        None
                    }
                }
            });
        }

        let mut snapshots: Vec<(usize, GroupSnapshot)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => snapshots.push(result),
                Ok(None) => {}
                Err(e) => warn!("Industry snapshot task aborted: {}", e),
            }
        }
        snapshots.sort_by_key(|(position, _)| *position);

        Ok(rank_snapshots(
            snapshots.into_iter().map(|(_, s)| s).collect(),
            limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::failover::FailoverConfig;
    use crate::provider::testing::ScriptedProvider;
    use crate::provider::Provider;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Analyzer returning canned results.
    #[derive(Default)]
    struct ScriptedAnalyzer {
        results: HashMap<String, (f64, f64)>,
        failing: HashSet<String>,
        panicking: HashSet<String>,
        stalled: HashSet<String>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedAnalyzer {
        fn with(mut self, id: &str, score: f64, change: f64) -> Self {
            self.results.insert(id.to_string(), (score, change));
            self
        }

        fn failing(mut self, id: &str) -> Self {
            self.failing.insert(id.to_string());
            self
        }

        fn panicking(mut self, id: &str) -> Self {
            self.panicking.insert(id.to_string());
            self
        }

        fn stalled(mut self, id: &str) -> Self {
            self.stalled.insert(id.to_string());
            self
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl EntityAnalyzer for ScriptedAnalyzer {
        async fn analyze(&self, entity_id: &str) -> anyhow::Result<EntityAnalysis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.stalled.contains(entity_id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            } else if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(entity_id) {
                panic!("analyzer bug on {}", entity_id);
            }
            if self.failing.contains(entity_id) {
                anyhow::bail!("no data for {}", entity_id);
            }
            let (score, change) = self.results.get(entity_id).copied().unwrap_or((50.0, 0.0));
            Ok(EntityAnalysis::new(entity_id, score, change))
        }
    }

    fn engine_with(
        provider: ScriptedProvider,
        analyzer: ScriptedAnalyzer,
        config: EngineConfig,
    ) -> (AggregationEngine, Arc<ScriptedAnalyzer>) {
        let provider: Arc<dyn Provider> = Arc::new(provider);
        let facade = Arc::new(DataFacade::new(vec![provider], FailoverConfig::default()).unwrap());
        let analyzer = Arc::new(analyzer);
        let engine = AggregationEngine::new(
            facade,
            Arc::clone(&analyzer) as Arc<dyn EntityAnalyzer>,
            Config::default().indices,
            config,
        );
        (engine, analyzer)
    }

    fn index_provider() -> ScriptedProvider {
        ScriptedProvider::new("primary").with_members(vec![
            GroupMember::weighted("a", 3.0),
            GroupMember::weighted("b", 1.0),
            GroupMember::weighted("c", 0.0),
        ])
    }

    fn industry_provider() -> ScriptedProvider {
        ScriptedProvider::new("primary").with_industries(vec![
            ("Banks", vec!["601398", "601939", "600036"]),
            ("Coal", vec!["601088"]),
            ("Chips", vec!["688981", "603986"]),
            ("Empty", vec![]),
        ])
    }

    #[tokio::test]
    async fn test_analyze_index_weights_members() {
        let analyzer = ScriptedAnalyzer::default()
            .with("a", 80.0, 1.2)
            .with("b", 60.0, -0.5)
            .with("c", 40.0, 0.0);
        let (engine, _) = engine_with(index_provider(), analyzer, EngineConfig::default());

        let summary = assert_ok!(engine.analyze_index("000300", None).await);

        assert_eq!(summary.name.as_deref(), Some("CSI 300"));
        assert_eq!(summary.score, 75.0);
        assert_eq!(summary.member_count, 3);
        assert_eq!((summary.up_count, summary.down_count, summary.flat_count), (1, 1, 1));
        assert_eq!(summary.top_members[0].entity_id, "a");
        assert_eq!(summary.top_members[0].weight, 3.0);
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let (engine, analyzer) =
            engine_with(index_provider(), ScriptedAnalyzer::default(), EngineConfig::default());

        let err = assert_err!(engine.analyze_index("999999", None).await);
        assert!(matches!(err, AnalysisError::UnknownGroup(ref g) if g.id == "999999"));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_industry_without_members() {
        let (engine, _) =
            engine_with(industry_provider(), ScriptedAnalyzer::default(), EngineConfig::default());

        let err = assert_err!(engine.analyze_industry("Empty", None).await);
        assert!(matches!(err, AnalysisError::NoMembers(_)));
    }

    #[tokio::test]
    async fn test_resolution_failure_is_reported() {
        // Index members need failover providers; this one only has boards.
        let provider = industry_provider().only(&[]);
        let (engine, _) = engine_with(provider, ScriptedAnalyzer::default(), EngineConfig::default());

        let err = assert_err!(engine.analyze_index("000300", None).await);
        assert!(matches!(err, AnalysisError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_failed_members_are_excluded() {
        let analyzer = ScriptedAnalyzer::default()
            .with("601398", 70.0, 1.0)
            .failing("601939")
            .panicking("600036");
        let (engine, _) = engine_with(industry_provider(), analyzer, EngineConfig::default());

        let summary = assert_ok!(engine.analyze_industry("Banks", None).await);
        assert_eq!(summary.member_count, 1);
        assert_eq!(summary.all_results[0].entity_id, "601398");
        assert_eq!(summary.score, 70.0);
    }

    #[tokio::test]
    async fn test_every_member_failing_is_an_error() {
        let analyzer = ScriptedAnalyzer::default().failing("688981").failing("603986");
        let (engine, _) = engine_with(industry_provider(), analyzer, EngineConfig::default());

        let err = assert_err!(engine.analyze_industry("Chips", None).await);
        assert!(matches!(err, AnalysisError::NoResults(_)));

        // Failures are not cached.
        assert!(engine.cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_timeout_excludes_stalled_member() {
        let analyzer = ScriptedAnalyzer::default().stalled("603986");
        let (engine, _) = engine_with(industry_provider(), analyzer, EngineConfig::default());

        let summary = assert_ok!(engine.analyze_industry("Chips", None).await);
        assert_eq!(summary.member_count, 1);
        assert_eq!(summary.all_results[0].entity_id, "688981");
    }

    #[tokio::test]
    async fn test_member_limit_keeps_heaviest() {
        let (engine, analyzer) =
            engine_with(index_provider(), ScriptedAnalyzer::default(), EngineConfig::default());

        let summary = assert_ok!(engine.analyze_index("000300", Some(2)).await);
        let ids: Vec<&str> = summary
            .all_results
            .iter()
            .map(|r| r.entity_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let analyzer = ScriptedAnalyzer::default().delayed(Duration::from_millis(100));
        let config = EngineConfig {
            concurrency: 2,
            ..EngineConfig::default()
        };
        let (engine, analyzer) = engine_with(industry_provider(), analyzer, config);

        let summary = assert_ok!(engine.analyze_industry("Banks", None).await);
        assert_eq!(summary.member_count, 3);
        assert_eq!(analyzer.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_summary_within_ttl() {
        let (engine, analyzer) =
            engine_with(index_provider(), ScriptedAnalyzer::default(), EngineConfig::default());

        let first = assert_ok!(engine.analyze_index("000300", None).await);
        tokio::time::advance(Duration::from_secs(3599)).await;
        let second = assert_ok!(engine.analyze_index("000300", None).await);

        assert_eq!(first, second);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_ok!(engine.analyze_index("000300", None).await);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 6);

        engine.clear_cache();
        assert_ok!(engine.analyze_index("000300", None).await);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_computation() {
        let analyzer = ScriptedAnalyzer::default().delayed(Duration::from_millis(100));
        let (engine, analyzer) = engine_with(index_provider(), analyzer, EngineConfig::default());

        let (first, second) = tokio::join!(
            engine.analyze_index("000300", None),
            engine.analyze_index("000300", None)
        );

        assert_eq!(assert_ok!(first), assert_ok!(second));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_compare_industries_skips_failed_snapshot() {
        let provider = industry_provider().failing_snapshot("Coal");
        let (engine, _) = engine_with(provider, ScriptedAnalyzer::default(), EngineConfig::default());

        let comparison = assert_ok!(engine.compare_industries(2).await);

        // Snapshot change equals member count in the scripted provider.
        let names: Vec<&str> = comparison.results.iter().map(|s| s.group.as_str()).collect();
        assert_eq!(names, vec!["Banks", "Chips", "Empty"]);
        assert_eq!(comparison.count, 3);
        assert_eq!(comparison.top.len(), 2);
        assert_eq!(comparison.top[0].group, "Banks");
        assert_eq!(comparison.bottom[1].group, "Empty");
    }

    #[tokio::test]
    async fn test_compare_without_industries() {
        let provider = ScriptedProvider::new("primary").with_industries(vec![]);
        let (engine, _) = engine_with(provider, ScriptedAnalyzer::default(), EngineConfig::default());

        assert!(matches!(
            engine.compare_industries(5).await,
            Err(AnalysisError::NoGroups)
        ));
    }

    #[test]
    fn test_engine_config_from_settings() {
        let settings = AnalysisSettings {
            member_timeout_seconds: 0,
            concurrency: 0,
            ..AnalysisSettings::default()
        };
        let config = EngineConfig::from(&settings);
        assert_eq!(config.member_timeout, None);
        assert_eq!(config.concurrency, 1);
        assert_eq!(EngineConfig::default().cache_ttl, Duration::from_secs(3600));
    }
}
