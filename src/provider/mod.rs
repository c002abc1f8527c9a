//! Upstream data provider contract.
//!
//! A provider is one upstream market-data source. Every provider implements
//! the minimal [`Provider`] trait and declares which operations it actually
//! serves through [`Provider::supports`]; the failover executor inspects that
//! declaration instead of assuming a universal interface. Operations only a
//! single vendor can serve live on optional extension traits
//! ([`BoardListing`], [`CapitalFlowSource`]) that a provider exposes by
//! returning `Some(self)` from [`Provider::board_listing`] or
//! [`Provider::capital_flow_source`].
//!
//! Providers own all vendor normalization (code formats, field names, units).
//! Fetches return an empty payload rather than partial garbage.

pub mod http;

#[cfg(test)]
pub mod testing;

pub use http::HttpProvider;

use crate::error::ProviderError;
use crate::models::{AdjustMode, GroupMember, GroupSnapshot, Operation, Record, TimeSeries};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Result type for a single provider call.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Minimal interface every upstream source implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable, unique name. Used as the key for health bookkeeping.
    fn name(&self) -> &str;

    /// Whether this provider serves the given operation at all.
    fn supports(&self, operation: Operation) -> bool;

    /// Daily bars for an entity over an inclusive date range.
    async fn fetch_history(
        &self,
        _entity_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _adjust: AdjustMode,
    ) -> ProviderResult<TimeSeries> {
        Err(ProviderError::Unsupported(Operation::History))
    }

    /// Constituents of an index.
    async fn fetch_group_members(&self, _group_id: &str) -> ProviderResult<Vec<GroupMember>> {
        Err(ProviderError::Unsupported(Operation::GroupMembers))
    }

    /// Basic descriptive data for an entity.
    async fn fetch_metadata(&self, _entity_id: &str) -> ProviderResult<Record> {
        Err(ProviderError::Unsupported(Operation::Metadata))
    }

    /// Financial statements or indicators for an entity.
    async fn fetch_financials(&self, _entity_id: &str) -> ProviderResult<Record> {
        Err(ProviderError::Unsupported(Operation::Financials))
    }

    /// Check if the provider is currently reachable. Never errors.
    async fn health_probe(&self) -> bool;

    /// Board and industry listings, if this provider offers them.
    fn board_listing(&self) -> Option<&dyn BoardListing> {
        None
    }

    /// Capital flow data, if this provider offers it.
    fn capital_flow_source(&self) -> Option<&dyn CapitalFlowSource> {
        None
    }

    /// Release any session held against the upstream.
    async fn shutdown(&self) {}
}

/// Board, industry and concept listings.
#[async_trait]
pub trait BoardListing: Send + Sync {
    /// Entity codes listed on an exchange board (e.g. `sh`, `sz`, `cyb`).
    async fn board_members(&self, board: &str) -> ProviderResult<Vec<String>>;

    /// Names of all known industries.
    async fn industry_list(&self) -> ProviderResult<Vec<String>>;

    /// Entity codes belonging to an industry.
    async fn industry_members(&self, industry: &str) -> ProviderResult<Vec<String>>;

    /// Latest daily change, volume and turnover of an industry.
    async fn industry_snapshot(&self, industry: &str) -> ProviderResult<GroupSnapshot>;

    /// Entity codes belonging to a concept theme.
    async fn concept_members(&self, concept: &str) -> ProviderResult<Vec<String>>;

    /// Members of a concept theme with name, latest price and change.
    async fn concept_member_details(&self, concept: &str) -> ProviderResult<Vec<Record>>;
}

/// Money-flow data.
#[async_trait]
pub trait CapitalFlowSource: Send + Sync {
    async fn capital_flow(&self, entity_id: &str) -> ProviderResult<Record>;

    /// Daily northbound (cross-border) flow history.
    async fn northbound_flow(&self) -> ProviderResult<Vec<Record>>;
}
