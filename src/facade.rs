//! Single access point for market data.
//!
//! The facade is constructed once at startup and shared by `Arc`. Operations
//! several providers can serve go through the [`FailoverExecutor`];
//! operations only one vendor offers are sent straight to the first provider
//! declaring the matching extension, with no failover.

use crate::error::{DataError, ProviderError};
use crate::failover::{FailoverConfig, FailoverExecutor};
use crate::models::{
    AdjustMode, GroupMember, GroupSnapshot, Operation, ProviderStatus, Record, TimeSeries,
};
use crate::provider::{BoardListing, CapitalFlowSource, Provider};
use chrono::NaiveDate;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of providers with failover routing.
pub struct DataFacade {
    executor: FailoverExecutor,
}

impl DataFacade {
    /// Register providers in priority order, primary first.
    ///
    /// Providers are only constructed here; any session is opened on first use.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        config: FailoverConfig,
    ) -> Result<Self, DataError> {
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.name().to_string()) {
                return Err(DataError::DuplicateProvider(provider.name().to_string()));
            }
        }

        debug!("Data facade ready with {} providers", providers.len());

        Ok(Self {
            executor: FailoverExecutor::new(providers, config),
        })
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.executor
            .providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    // ========== Failover operations ==========

    /// Daily bars for an entity.
    pub async fn history(
        &self,
        entity_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        adjust: AdjustMode,
    ) -> Result<TimeSeries, DataError> {
        Ok(self
            .executor
            .execute(Operation::History, |p| async move {
                p.fetch_history(entity_id, start, end, adjust).await
            })
            .await?)
    }

    /// Constituents of an index.
    pub async fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>, DataError> {
        Ok(self
            .executor
            .execute(Operation::GroupMembers, |p| async move {
                p.fetch_group_members(group_id).await
            })
            .await?)
    }

    pub async fn metadata(&self, entity_id: &str) -> Result<Record, DataError> {
        Ok(self
            .executor
            .execute(Operation::Metadata, |p| async move {
                p.fetch_metadata(entity_id).await
            })
            .await?)
    }

    pub async fn financials(&self, entity_id: &str) -> Result<Record, DataError> {
        Ok(self
            .executor
            .execute(Operation::Financials, |p| async move {
                p.fetch_financials(entity_id).await
            })
            .await?)
    }

    // ========== Provider-exclusive operations ==========

    fn boards_for(&self, operation: Operation) -> Result<(&str, &dyn BoardListing), DataError> {
        self.executor
            .providers()
            .iter()
            .find_map(|p| p.board_listing().map(|b| (p.name(), b)))
            .ok_or(DataError::NotOffered(operation))
    }

    fn flows_for(
        &self,
        operation: Operation,
    ) -> Result<(&str, &dyn CapitalFlowSource), DataError> {
        self.executor
            .providers()
            .iter()
            .find_map(|p| p.capital_flow_source().map(|f| (p.name(), f)))
            .ok_or(DataError::NotOffered(operation))
    }

    pub async fn board_members(&self, board: &str) -> Result<Vec<String>, DataError> {
        let (name, boards) = self.boards_for(Operation::BoardMembers)?;
        boards.board_members(board).await.map_err(tag(name))
    }

    pub async fn industry_list(&self) -> Result<Vec<String>, DataError> {
        let (name, boards) = self.boards_for(Operation::IndustryList)?;
        boards.industry_list().await.map_err(tag(name))
    }

    pub async fn industry_members(&self, industry: &str) -> Result<Vec<String>, DataError> {
        let (name, boards) = self.boards_for(Operation::IndustryMembers)?;
        boards.industry_members(industry).await.map_err(tag(name))
    }

    pub async fn industry_snapshot(&self, industry: &str) -> Result<GroupSnapshot, DataError> {
        let (name, boards) = self.boards_for(Operation::IndustrySnapshot)?;
        boards.industry_snapshot(industry).await.map_err(tag(name))
    }

    pub async fn concept_members(&self, concept: &str) -> Result<Vec<String>, DataError> {
        let (name, boards) = self.boards_for(Operation::ConceptMembers)?;
        boards.concept_members(concept).await.map_err(tag(name))
    }

    /// Concept members with name and latest price.
    pub async fn concept_member_details(&self, concept: &str) -> Result<Vec<Record>, DataError> {
        let (name, boards) = self.boards_for(Operation::ConceptMemberDetails)?;
        boards
            .concept_member_details(concept)
            .await
            .map_err(tag(name))
    }

    pub async fn capital_flow(&self, entity_id: &str) -> Result<Record, DataError> {
        let (name, flows) = self.flows_for(Operation::CapitalFlow)?;
        flows.capital_flow(entity_id).await.map_err(tag(name))
    }

    pub async fn northbound_flow(&self) -> Result<Vec<Record>, DataError> {
        let (name, flows) = self.flows_for(Operation::NorthboundFlow)?;
        flows.northbound_flow().await.map_err(tag(name))
    }

    // ========== Status management ==========

    /// Probe every provider independently.
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let probes = self.executor.providers().iter().map(|p| async move {
            let healthy = p.health_probe().await;
            debug!("[{}] health probe: {}", p.name(), healthy);
            (p.name().to_string(), healthy)
        });
        join_all(probes).await.into_iter().collect()
    }

    pub fn status(&self) -> ProviderStatus {
        self.executor.status()
    }

    #[allow(dead_code)] // For long-running embedders
    pub fn reset_status(&self) {
        self.executor.reset();
    }

    /// Release provider sessions. Call once before process exit.
    pub async fn shutdown(&self) {
        for provider in self.executor.providers() {
            provider.shutdown().await;
        }
        info!("Data facade shut down");
    }
}

fn tag(provider: &str) -> impl Fn(ProviderError) -> DataError + '_ {
    move |source| DataError::Provider {
        provider: provider.to_string(),
        source,
    }
}
