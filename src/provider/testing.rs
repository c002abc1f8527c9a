//! Scripted in-memory provider for tests.

use super::{BoardListing, CapitalFlowSource, Provider, ProviderResult};
use crate::error::ProviderError;
use crate::models::{
    AdjustMode, Bar, GroupMember, GroupSnapshot, Operation, Record, TimeSeries,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How a scripted call responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Return a non-empty payload.
    Valid,
    /// Return an empty payload.
    Empty,
    /// Fail with a network error.
    Fail,
}

pub struct ScriptedProvider {
    name: String,
    operations: HashSet<Operation>,
    default_behavior: Mutex<Behavior>,
    script: Mutex<VecDeque<Behavior>>,
    calls: Mutex<HashMap<Operation, usize>>,
    healthy: bool,
    members: Vec<GroupMember>,
    industries: Option<Vec<(String, Vec<String>)>>,
    failing_snapshots: HashSet<String>,
    shutdowns: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            operations: Operation::FAILOVER.into_iter().collect(),
            default_behavior: Mutex::new(Behavior::Valid),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(HashMap::new()),
            healthy: true,
            members: vec![
                GroupMember::new("600000"),
                GroupMember::new("000001"),
            ],
            industries: None,
            failing_snapshots: HashSet::new(),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn behaving(self, behavior: Behavior) -> Self {
        *self.default_behavior.lock().unwrap() = behavior;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn only(mut self, operations: &[Operation]) -> Self {
        self.operations = operations.iter().copied().collect();
        self
    }

    pub fn with_members(mut self, members: Vec<GroupMember>) -> Self {
        self.members = members;
        self
    }

    pub fn with_industries(mut self, industries: Vec<(&str, Vec<&str>)>) -> Self {
        self.industries = Some(
            industries
                .into_iter()
                .map(|(name, codes)| {
                    (name.to_string(), codes.into_iter().map(String::from).collect())
                })
                .collect(),
        );
        self
    }

    pub fn failing_snapshot(mut self, industry: &str) -> Self {
        self.failing_snapshots.insert(industry.to_string());
        self
    }

    /// Queue one-shot behaviors consumed before the default applies.
    pub fn script(&self, behaviors: &[Behavior]) {
        self.script.lock().unwrap().extend(behaviors.iter().copied());
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.default_behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.calls.lock().unwrap().get(&operation).copied().unwrap_or(0)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn next(&self, operation: Operation) -> Behavior {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.default_behavior.lock().unwrap())
    }

    fn failure(&self) -> ProviderError {
        ProviderError::Network(format!("{} is down", self.name))
    }

    fn source_record(&self, entity_id: &str) -> Record {
        let mut record = Record::new();
        record.insert("source".to_string(), json!(self.name));
        record.insert("code".to_string(), json!(entity_id));
        record
    }

    fn industry(&self, name: &str) -> Option<&Vec<String>> {
        self.industries
            .as_ref()?
            .iter()
            .find(|(industry, _)| industry == name)
            .map(|(_, codes)| codes)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    async fn fetch_history(
        &self,
        entity_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _adjust: AdjustMode,
    ) -> ProviderResult<TimeSeries> {
        match self.next(Operation::History) {
            Behavior::Fail => Err(self.failure()),
            Behavior::Empty => Ok(TimeSeries::default()),
            Behavior::Valid => {
                let bars = (1..=3)
                    .map(|d| Bar {
                        date: NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
                        open: 10.0,
                        high: 11.0,
                        low: 9.0,
                        close: 10.0 + d as f64,
                        volume: 1000.0,
                        amount: 0.0,
                    })
                    .collect();
                Ok(TimeSeries::new(format!("{}@{}", entity_id, self.name), bars))
            }
        }
    }

    async fn fetch_group_members(&self, _group_id: &str) -> ProviderResult<Vec<GroupMember>> {
        match self.next(Operation::GroupMembers) {
            Behavior::Fail => Err(self.failure()),
            Behavior::Empty => Ok(Vec::new()),
            Behavior::Valid => Ok(self.members.clone()),
        }
    }

    async fn fetch_metadata(&self, entity_id: &str) -> ProviderResult<Record> {
        match self.next(Operation::Metadata) {
            Behavior::Fail => Err(self.failure()),
            Behavior::Empty => Ok(Record::new()),
            Behavior::Valid => Ok(self.source_record(entity_id)),
        }
    }

    async fn fetch_financials(&self, entity_id: &str) -> ProviderResult<Record> {
        match self.next(Operation::Financials) {
            Behavior::Fail => Err(self.failure()),
            Behavior::Empty => Ok(Record::new()),
            Behavior::Valid => Ok(self.source_record(entity_id)),
        }
    }

    async fn health_probe(&self) -> bool {
        self.healthy
    }

    fn board_listing(&self) -> Option<&dyn BoardListing> {
        self.industries.as_ref().map(|_| self as &dyn BoardListing)
    }

    fn capital_flow_source(&self) -> Option<&dyn CapitalFlowSource> {
        self.industries.as_ref().map(|_| self as &dyn CapitalFlowSource)
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BoardListing for ScriptedProvider {
    async fn board_members(&self, board: &str) -> ProviderResult<Vec<String>> {
        self.next(Operation::BoardMembers);
        Ok(vec![format!("{}-1", board), format!("{}-2", board)])
    }

    async fn industry_list(&self) -> ProviderResult<Vec<String>> {
        self.next(Operation::IndustryList);
        Ok(self
            .industries
            .iter()
            .flatten()
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn industry_members(&self, industry: &str) -> ProviderResult<Vec<String>> {
        self.next(Operation::IndustryMembers);
        Ok(self.industry(industry).cloned().unwrap_or_default())
    }

    async fn industry_snapshot(&self, industry: &str) -> ProviderResult<GroupSnapshot> {
        self.next(Operation::IndustrySnapshot);
        if self.failing_snapshots.contains(industry) {
            return Err(self.failure());
        }
        let change = self
            .industry(industry)
            .map(|codes| codes.len() as f64)
            .unwrap_or(0.0);
        Ok(GroupSnapshot {
            group: industry.to_string(),
            change,
            volume: 100.0,
            turnover: 1000.0,
        })
    }

    async fn concept_members(&self, concept: &str) -> ProviderResult<Vec<String>> {
        self.next(Operation::ConceptMembers);
        Ok(self.industry(concept).cloned().unwrap_or_default())
    }

    async fn concept_member_details(&self, concept: &str) -> ProviderResult<Vec<Record>> {
        self.next(Operation::ConceptMemberDetails);
        Ok(self
            .industry(concept)
            .into_iter()
            .flatten()
            .map(|code| {
                let mut record = self.source_record(code);
                record.insert("price".to_string(), json!(10.0));
                record
            })
            .collect())
    }
}

#[async_trait]
impl CapitalFlowSource for ScriptedProvider {
    async fn capital_flow(&self, entity_id: &str) -> ProviderResult<Record> {
        self.next(Operation::CapitalFlow);
        Ok(self.source_record(entity_id))
    }

    async fn northbound_flow(&self) -> ProviderResult<Vec<Record>> {
        self.next(Operation::NorthboundFlow);
        Ok(vec![self.source_record("northbound")])
    }
}
