//! Structured error types.
//!
//! Errors are layered the way data flows: a single provider call fails with
//! [`ProviderError`], the failover executor reports exhaustion with
//! [`FailoverError`], the facade wraps both in [`DataError`], and the
//! aggregation engine surfaces [`AnalysisError`].

use crate::models::{GroupKey, Operation};
use thiserror::Error;

/// Failure of one call against one provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("operation '{0}' is not supported by this provider")]
    Unsupported(Operation),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("session could not be established: {0}")]
    Session(String),

    #[error("response format changed: {0}")]
    Decode(String),

    #[error("{provider} returned an empty result")]
    Empty { provider: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// Every eligible provider failed or was circuit-open.
#[derive(Debug, Clone, Error)]
pub enum FailoverError {
    #[error("{}", exhausted_message(.operation, .tried, .last_error))]
    Exhausted {
        operation: Operation,
        tried: Vec<String>,
        last_error: Option<ProviderError>,
    },
}

fn exhausted_message(
    operation: &Operation,
    tried: &[String],
    last_error: &Option<ProviderError>,
) -> String {
    let mut msg = format!(
        "all providers unavailable for {} (tried: [{}])",
        operation,
        tried.join(", ")
    );
    if let Some(e) = last_error {
        msg.push_str(&format!(", last error: {}", e));
    }
    msg
}

/// Error surfaced by the data facade.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error(transparent)]
    Failover(#[from] FailoverError),

    #[error("{provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("no registered provider offers {0}")]
    NotOffered(Operation),

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),
}

/// Error surfaced by the aggregation engine.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("unknown group: {0}")]
    UnknownGroup(GroupKey),

    #[error("no members resolved for {0}")]
    NoMembers(GroupKey),

    #[error("could not resolve members of {group}: {source}")]
    Resolution {
        group: GroupKey,
        #[source]
        source: DataError,
    },

    #[error("every member analysis failed for {0}")]
    NoResults(GroupKey),

    #[error("no groups available to compare")]
    NoGroups,

    #[error("could not list groups: {0}")]
    Listing(#[from] DataError),
}
