//! JSON-over-HTTP provider.
//!
//! Speaks a small REST contract against one upstream gateway:
//!
//! - `GET history/{code}?start=&end=&adjust=` → array of bars
//! - `GET groups/{id}/members` → array of codes or `{code, weight}` objects
//! - `GET entities/{code}/info`, `GET entities/{code}/financials` → object
//! - `GET health` → any 2xx
//! - `POST session` → `{"token": ...}`, `DELETE session` (when sessions are on)
//! - `GET boards/{board}/members`, `GET industries`,
//!   `GET industries/{name}/members`, `GET industries/{name}/snapshot`,
//!   `GET concepts/{name}/members`, `GET concepts/{name}/details`
//! - `GET entities/{code}/capital-flow`, `GET northbound-flow`
//!
//! Vendors disagree on code formats and field names, so entity codes are
//! rewritten into the configured [`CodeStyle`] on the way out and back to
//! plain six-digit form on the way in, and bar fields accept the common
//! vendor aliases. A 404 is an empty payload, not an error.
//!
//! Identifiers are opaque: each one is pushed as a single percent-encoded
//! path segment, so `Oil/Gas` or `Banks?x` never change the route.

use super::{BoardListing, CapitalFlowSource, Provider, ProviderResult};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::{
    AdjustMode, Bar, GroupMember, GroupSnapshot, Operation, Record, TimeSeries,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How a vendor spells entity codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStyle {
    /// `600000`
    #[default]
    Plain,
    /// `sh.600000`
    Dotted,
    /// `sh600000`
    Prefixed,
}

impl CodeStyle {
    /// Render a code in this style.
    pub fn format(&self, code: &str) -> String {
        let plain = plain_code(code);
        match self {
            CodeStyle::Plain => plain,
            CodeStyle::Dotted => format!("{}.{}", exchange_of(&plain), plain),
            CodeStyle::Prefixed => format!("{}{}", exchange_of(&plain), plain),
        }
    }
}

/// Strip exchange prefixes and suffixes: `sh.600000`, `sz000001`,
/// `600000.SH` all become the bare code.
pub fn plain_code(code: &str) -> String {
    let code = code.trim();
    let lower = code.to_ascii_lowercase();

    for suffix in [".sh", ".sz", ".bj"] {
        if lower.ends_with(suffix) {
            return code[..code.len() - suffix.len()].to_string();
        }
    }
    for prefix in ["sh.", "sz.", "bj."] {
        if lower.starts_with(prefix) {
            return code[prefix.len()..].to_string();
        }
    }
    for prefix in ["sh", "sz", "bj"] {
        if lower.starts_with(prefix) && code[prefix.len()..].chars().all(|c| c.is_ascii_digit()) {
            return code[prefix.len()..].to_string();
        }
    }
    code.to_string()
}

fn exchange_of(plain: &str) -> &'static str {
    if plain.starts_with('6') {
        "sh"
    } else {
        "sz"
    }
}

/// Provider backed by an HTTP gateway.
pub struct HttpProvider {
    name: String,
    base_url: Url,
    code_style: CodeStyle,
    compact_dates: bool,
    operations: HashSet<Operation>,
    boards: bool,
    flows: bool,
    uses_session: bool,
    session: Mutex<Option<String>>,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Build the provider. No network I/O happens here; sessions are opened
    /// on first use.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base URL for provider {}", config.name))?;
        if base_url.cannot_be_a_base() {
            bail!("Base URL {} cannot carry a path", config.base_url);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        let boards = config.extensions.iter().any(|e| e == "boards");
        let flows = config.extensions.iter().any(|e| e == "capital_flow");

        let mut operations: HashSet<Operation> = config.operations.iter().copied().collect();
        if boards {
            operations.extend([
                Operation::BoardMembers,
                Operation::IndustryList,
                Operation::IndustryMembers,
                Operation::IndustrySnapshot,
                Operation::ConceptMembers,
                Operation::ConceptMemberDetails,
            ]);
        }
        if flows {
            operations.extend([Operation::CapitalFlow, Operation::NorthboundFlow]);
        }

        debug!(
            "Configured provider {} at {} ({} operations)",
            config.name,
            config.base_url,
            operations.len()
        );

        Ok(Self {
            name: config.name.clone(),
            base_url,
            code_style: config.code_style,
            compact_dates: config.compact_dates,
            operations,
            boards,
            flows,
            uses_session: config.session,
            session: Mutex::new(None),
            client,
        })
    }

    /// Base URL extended by one encoded path segment per item.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in from_config: the base always carries a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn format_date(&self, date: NaiveDate) -> String {
        if self.compact_dates {
            date.format("%Y%m%d").to_string()
        } else {
            date.format("%Y-%m-%d").to_string()
        }
    }

    /// Bearer token for the current session, logging in if needed.
    async fn token(&self) -> ProviderResult<Option<String>> {
        if !self.uses_session {
            return Ok(None);
        }

        let mut session = self.session.lock().await;
        if let Some(token) = session.as_ref() {
            return Ok(Some(token.clone()));
        }

        info!("[{}] opening session", self.name);
        let response = self
            .client
            .post(self.endpoint(&["session"]))
            .send()
            .await
            .map_err(|e| ProviderError::Session(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Session(format!(
                "login rejected with HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Session(e.to_string()))?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Session("login response has no token".to_string()))?
            .to_string();

        *session = Some(token.clone());
        Ok(Some(token))
    }

    /// GET a JSON document. A 404 yields `Value::Null`.
    async fn get(&self, segments: &[&str], query: &[(&str, String)]) -> ProviderResult<Value> {
        let url = self.endpoint(segments);
        debug!("[{}] GET {}", self.name, url.path());

        let mut request = self.client.get(url).query(query);
        if let Some(token) = self.token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED && self.uses_session {
            // Expired session: drop it so the next call logs in again.
            *self.session.lock().await = None;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    async fn get_codes(&self, segments: &[&str]) -> ProviderResult<Vec<String>> {
        let value = self.get(segments, &[]).await?;
        Ok(parse_members(&value)?
            .into_iter()
            .map(|m| m.entity_id)
            .collect())
    }

    async fn get_record(&self, segments: &[&str]) -> ProviderResult<Record> {
        match self.get(segments, &[]).await? {
            Value::Null => Ok(Record::new()),
            Value::Object(map) => Ok(map),
            other => Err(ProviderError::Decode(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    async fn fetch_history(
        &self,
        entity_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        adjust: AdjustMode,
    ) -> ProviderResult<TimeSeries> {
        let code = self.code_style.format(entity_id);
        let query = [
            ("start", self.format_date(start)),
            ("end", self.format_date(end)),
            ("adjust", adjust.code().to_string()),
        ];
        let value = self.get(&["history", code.as_str()], &query).await?;
        let bars = parse_bars(&value)?;
        Ok(TimeSeries::new(plain_code(entity_id), bars))
    }

    async fn fetch_group_members(&self, group_id: &str) -> ProviderResult<Vec<GroupMember>> {
        let value = self.get(&["groups", group_id, "members"], &[]).await?;
        parse_members(&value)
    }

    async fn fetch_metadata(&self, entity_id: &str) -> ProviderResult<Record> {
        let code = self.code_style.format(entity_id);
        self.get_record(&["entities", code.as_str(), "info"]).await
    }

    async fn fetch_financials(&self, entity_id: &str) -> ProviderResult<Record> {
        let code = self.code_style.format(entity_id);
        self.get_record(&["entities", code.as_str(), "financials"]).await
    }

    async fn health_probe(&self) -> bool {
        match self.client.get(self.endpoint(&["health"])).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("[{}] health probe failed: {}", self.name, e);
                false
            }
        }
    }

    fn board_listing(&self) -> Option<&dyn BoardListing> {
        if self.boards {
            Some(self)
        } else {
            None
        }
    }

    fn capital_flow_source(&self) -> Option<&dyn CapitalFlowSource> {
        if self.flows {
            Some(self)
        } else {
            None
        }
    }

    async fn shutdown(&self) {
        let token = self.session.lock().await.take();
        let Some(token) = token else {
            return;
        };

        info!("[{}] closing session", self.name);
        let result = self
            .client
            .delete(self.endpoint(&["session"]))
            .bearer_auth(token)
            .send()
            .await;
        if let Err(e) = result {
            warn!("[{}] logout failed: {}", self.name, e);
        }
    }
}

#[async_trait]
impl BoardListing for HttpProvider {
    async fn board_members(&self, board: &str) -> ProviderResult<Vec<String>> {
        self.get_codes(&["boards", board, "members"]).await
    }

    async fn industry_list(&self) -> ProviderResult<Vec<String>> {
        let value = self.get(&["industries"], &[]).await?;
        let Value::Array(items) = value else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => field(obj, &["name", "板块名称"])
                    .and_then(Value::as_str)
                    .map(String::from),
                _ => None,
            })
            .collect())
    }

    async fn industry_members(&self, industry: &str) -> ProviderResult<Vec<String>> {
        self.get_codes(&["industries", industry, "members"]).await
    }

    async fn industry_snapshot(&self, industry: &str) -> ProviderResult<GroupSnapshot> {
        let record = self
            .get_record(&["industries", industry, "snapshot"])
            .await?;
        let change = field(&record, &["change", "涨跌幅"])
            .and_then(number)
            .ok_or_else(|| ProviderError::Decode(format!("no change for {}", industry)))?;

        Ok(GroupSnapshot {
            group: industry.to_string(),
            change,
            volume: field(&record, &["volume", "成交量"])
                .and_then(number)
                .unwrap_or(0.0),
            turnover: field(&record, &["turnover", "amount", "成交额"])
                .and_then(number)
                .unwrap_or(0.0),
        })
    }

    async fn concept_members(&self, concept: &str) -> ProviderResult<Vec<String>> {
        let codes = self.get_codes(&["concepts", concept, "members"]).await?;
        if !codes.is_empty() {
            return Ok(codes);
        }
        // Many themes are published as industries instead.
        self.industry_members(concept).await
    }

    async fn concept_member_details(&self, concept: &str) -> ProviderResult<Vec<Record>> {
        let value = self.get(&["concepts", concept, "details"], &[]).await?;
        let details = parse_member_details(&value)?;
        if !details.is_empty() {
            return Ok(details);
        }
        let value = self.get(&["industries", concept, "details"], &[]).await?;
        parse_member_details(&value)
    }
}

#[async_trait]
impl CapitalFlowSource for HttpProvider {
    async fn capital_flow(&self, entity_id: &str) -> ProviderResult<Record> {
        let code = self.code_style.format(entity_id);
        self.get_record(&["entities", code.as_str(), "capital-flow"]).await
    }

    async fn northbound_flow(&self) -> ProviderResult<Vec<Record>> {
        match self.get(&["northbound-flow"], &[]).await? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}

/// First present field among vendor aliases.
fn field<'a>(obj: &'a Record, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name))
}

/// Numbers arrive as JSON numbers or numeric strings.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s.get(..8).unwrap_or(s), "%Y%m%d"))
        .ok()
}

/// Decode bars. A single malformed row rejects the whole payload.
fn parse_bars(value: &Value) -> ProviderResult<Vec<Bar>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ProviderError::Decode(format!(
                "expected an array of bars, got {}",
                other
            )))
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| ProviderError::Decode(format!("bar {} is not an object", i)))?;
            let num = |names: &[&str]| field(obj, names).and_then(number);
            let date = field(obj, &["date", "trade_date", "日期"])
                .and_then(parse_date)
                .ok_or_else(|| ProviderError::Decode(format!("bar {} has no valid date", i)))?;
            let close = num(&["close", "收盘"])
                .ok_or_else(|| ProviderError::Decode(format!("bar {} has no close", i)))?;

            Ok(Bar {
                date,
                open: num(&["open", "开盘"]).unwrap_or(close),
                high: num(&["high", "最高"]).unwrap_or(close),
                low: num(&["low", "最低"]).unwrap_or(close),
                close,
                volume: num(&["volume", "成交量"]).unwrap_or(0.0),
                amount: num(&["amount", "成交额"]).unwrap_or(0.0),
            })
        })
        .collect()
}

/// Decode a member list of bare codes or `{code, weight}` objects.
fn parse_members(value: &Value) -> ProviderResult<Vec<GroupMember>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ProviderError::Decode(format!(
                "expected an array of members, got {}",
                other
            )))
        }
    };

    let mut members = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(code) => members.push(GroupMember::new(plain_code(code))),
            Value::Object(obj) => {
                let code = field(obj, &["code", "成分券代码", "代码"])
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::Decode("member without code".to_string()))?;
                let code = plain_code(code);
                members.push(match field(obj, &["weight", "权重"]).and_then(number) {
                    Some(weight) => GroupMember::weighted(code, weight),
                    None => GroupMember::new(code),
                });
            }
            other => {
                return Err(ProviderError::Decode(format!(
                    "unexpected member entry: {}",
                    other
                )))
            }
        }
    }
    Ok(members)
}

/// Decode per-member detail rows: code, name, latest price and change.
/// Missing or non-numeric prices read as 0.
fn parse_member_details(value: &Value) -> ProviderResult<Vec<Record>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ProviderError::Decode(format!(
                "expected an array of member details, got {}",
                other
            )))
        }
    };

    items
        .iter()
        .map(|item| {
            let obj = item
                .as_object()
                .ok_or_else(|| ProviderError::Decode("member detail is not an object".to_string()))?;
            let code = field(obj, &["code", "代码"])
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Decode("member detail without code".to_string()))?;
            let name = field(obj, &["name", "名称"])
                .and_then(Value::as_str)
                .unwrap_or_default();
            let num = |names: &[&str]| field(obj, names).and_then(number).unwrap_or(0.0);

            let mut record = Record::new();
            record.insert("code".to_string(), Value::from(plain_code(code)));
            record.insert("name".to_string(), Value::from(name));
            record.insert("price".to_string(), Value::from(num(&["price", "最新价"])));
            record.insert(
                "change_percent".to_string(),
                Value::from(num(&["change_percent", "change", "涨跌幅"])),
            );
            Ok(record)
        })
        .collect()
}
