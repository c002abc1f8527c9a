//! Per-entity analysis.
//!
//! The engine only knows the [`EntityAnalyzer`] contract. [`HistoryScorer`]
//! is the built-in implementation: a momentum score computed from recent
//! daily bars fetched through the facade.

use crate::facade::DataFacade;
use crate::models::{AdjustMode, EntityAnalysis, TimeSeries};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

/// Scores a single entity.
#[async_trait]
pub trait EntityAnalyzer: Send + Sync {
    async fn analyze(&self, entity_id: &str) -> Result<EntityAnalysis>;
}

/// Bars used for the rate of change and the moving average.
const LOOKBACK_BARS: usize = 20;
/// Calendar days requested, enough for `LOOKBACK_BARS` trading days.
const HISTORY_DAYS: i64 = 120;

const NEUTRAL_SCORE: f64 = 50.0;
const ROC_WEIGHT: f64 = 1.5;
const MA_GAP_WEIGHT: f64 = 2.0;

/// Momentum scorer over forward-adjusted daily closes.
///
/// `score = 50 + 1.5 * roc_20 + 2 * ma_gap_20`, clamped to `0..=100`, where
/// `roc_20` is the percent change over the last 20 bars and `ma_gap_20` is
/// the percent distance of the last close from its 20-bar mean.
pub struct HistoryScorer {
    facade: Arc<DataFacade>,
}

impl HistoryScorer {
    pub fn new(facade: Arc<DataFacade>) -> Self {
        Self { facade }
    }

    /// Score an already fetched series.
    pub fn score_series(series: &TimeSeries) -> Result<EntityAnalysis> {
        let closes = series.closes();
        if closes.len() < 2 {
            bail!(
                "{} has {} bars, at least 2 are needed",
                series.entity_id,
                closes.len()
            );
        }

        let last = closes[closes.len() - 1];
        let previous = closes[closes.len() - 2];
        let change = percent_change(previous, last);

        let base = closes[closes.len() - 1 - LOOKBACK_BARS.min(closes.len() - 1)];
        let roc = percent_change(base, last);

        let window = &closes[closes.len() - LOOKBACK_BARS.min(closes.len())..];
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let ma_gap = percent_change(mean, last);

        let score = (NEUTRAL_SCORE + ROC_WEIGHT * roc + MA_GAP_WEIGHT * ma_gap).clamp(0.0, 100.0);

        let mut analysis = EntityAnalysis::new(&series.entity_id, round2(score), round2(change));
        analysis.details.insert("last_close".to_string(), json!(last));
        analysis.details.insert("roc_20".to_string(), json!(round2(roc)));
        analysis.details.insert("ma_20".to_string(), json!(round2(mean)));
        Ok(analysis)
    }
}

#[async_trait]
impl EntityAnalyzer for HistoryScorer {
    async fn analyze(&self, entity_id: &str) -> Result<EntityAnalysis> {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(HISTORY_DAYS);

        let series = self
            .facade
            .history(entity_id, start, end, AdjustMode::Forward)
            .await?;

        let mut analysis = Self::score_series(&series)?;
        analysis.entity_id = entity_id.to_string();
        Ok(analysis)
    }
}

fn percent_change(from: f64, to: f64) -> f64 {
    if from > 0.0 && to.is_finite() {
        (to / from - 1.0) * 100.0
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
