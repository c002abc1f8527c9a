//! Data models for market data retrieval and group analysis.
//!
//! This module contains the core data structures shared by providers,
//! the failover executor, and the aggregation engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Loosely structured record returned by metadata, financials and flow queries.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A retrievable operation, used for capability checks and health bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    History,
    GroupMembers,
    Metadata,
    Financials,
    BoardMembers,
    IndustryList,
    IndustryMembers,
    IndustrySnapshot,
    ConceptMembers,
    ConceptMemberDetails,
    CapitalFlow,
    NorthboundFlow,
}

impl Operation {
    /// Operations routed through the failover executor.
    pub const FAILOVER: [Operation; 4] = [
        Operation::History,
        Operation::GroupMembers,
        Operation::Metadata,
        Operation::Financials,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::History => "history",
            Operation::GroupMembers => "group_members",
            Operation::Metadata => "metadata",
            Operation::Financials => "financials",
            Operation::BoardMembers => "board_members",
            Operation::IndustryList => "industry_list",
            Operation::IndustryMembers => "industry_members",
            Operation::IndustrySnapshot => "industry_snapshot",
            Operation::ConceptMembers => "concept_members",
            Operation::ConceptMemberDetails => "concept_member_details",
            Operation::CapitalFlow => "capital_flow",
            Operation::NorthboundFlow => "northbound_flow",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price adjustment applied to a history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AdjustMode {
    /// Forward-adjusted prices (default)
    #[default]
    Forward,
    /// Backward-adjusted prices
    Backward,
    /// Raw, unadjusted prices
    None,
}

impl AdjustMode {
    /// Wire code used by upstream vendors.
    pub fn code(&self) -> &'static str {
        match self {
            AdjustMode::Forward => "qfq",
            AdjustMode::Backward => "hfq",
            AdjustMode::None => "",
        }
    }
}

/// Daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub amount: f64,
}

/// Price history for one entity, bars ascending by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub entity_id: String,
    pub bars: Vec<Bar>,
}

impl TimeSeries {
    pub fn new(entity_id: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.date);
        Self {
            entity_id: entity_id.into(),
            bars,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Closing prices in date order.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

/// One constituent of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub entity_id: String,
    /// Index weight, when the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl GroupMember {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            weight: None,
        }
    }

    pub fn weighted(entity_id: impl Into<String>, weight: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            weight: Some(weight),
        }
    }

    /// Weight used for selection and aggregation: 1 when absent, never negative.
    pub fn effective_weight(&self) -> f64 {
        match self.weight {
            Some(w) if w.is_finite() => w.max(0.0),
            _ => 1.0,
        }
    }
}

/// Kind of group being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Index,
    Industry,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Index => write!(f, "index"),
            GroupKind::Industry => write!(f, "industry"),
        }
    }
}

/// Cache and identity key of an analyzed group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub kind: GroupKind,
    pub id: String,
}

impl GroupKey {
    pub fn index(code: impl Into<String>) -> Self {
        Self {
            kind: GroupKind::Index,
            id: code.into(),
        }
    }

    pub fn industry(name: impl Into<String>) -> Self {
        Self {
            kind: GroupKind::Industry,
            id: name.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Result of scoring a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAnalysis {
    pub entity_id: String,
    pub score: f64,
    pub price_change_percent: f64,
    /// Member weight, attached after analysis.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Analyzer-specific fields carried through untouched.
    #[serde(flatten)]
    pub details: Record,
}

fn default_weight() -> f64 {
    1.0
}

impl EntityAnalysis {
    pub fn new(entity_id: impl Into<String>, score: f64, price_change_percent: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            score,
            price_change_percent,
            weight: 1.0,
            details: Record::new(),
        }
    }
}

/// Aggregated analysis of a whole group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: GroupKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Weighted mean score, rounded to two decimals.
    pub score: f64,
    pub member_count: usize,
    pub up_count: usize,
    pub down_count: usize,
    pub flat_count: usize,
    pub up_ratio: f64,
    pub weighted_change: f64,
    /// Best five members by score.
    pub top_members: Vec<EntityAnalysis>,
    /// Every successful member, score descending.
    pub all_results: Vec<EntityAnalysis>,
    pub computed_at: DateTime<Utc>,
}

impl GroupSummary {
    /// Display label, preferring the human name over the raw id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.group.id),
            None => self.group.id.clone(),
        }
    }
}

/// Lightweight daily performance of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group: String,
    pub change: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub turnover: f64,
}

/// Ranked comparison across groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupComparison {
    pub count: usize,
    pub top: Vec<GroupSnapshot>,
    pub bottom: Vec<GroupSnapshot>,
    pub results: Vec<GroupSnapshot>,
}

/// Per-provider health exposed by the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    /// `true` while the provider's circuit is closed.
    pub status: BTreeMap<String, bool>,
    pub fail_count: BTreeMap<String, u32>,
}
