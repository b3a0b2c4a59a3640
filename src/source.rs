//! Seams to the tracking backend and the credential store.
//!
//! Nothing in this crate talks to the network directly. A host plugin provides
//! a [`CredentialProvider`]; the session it hands out opens a
//! [`RemoteDataSource`] that executes queries.

use std::sync::Arc;
use thiserror::Error;

use crate::query::{Filter, Query, Record};

/// Failure while executing a query against the backend.
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("query rejected: {0}")]
    Query(String),
    #[error("{0}")]
    Other(String),
}

impl DataSourceError {
    /// Short stable category used as a log field.
    ///
    /// `Other` messages are inspected so that backend errors which arrive as
    /// bare strings still land in a useful bucket.
    pub fn classify(&self) -> &'static str {
        match self {
            DataSourceError::Network(_) => "network",
            DataSourceError::Auth(_) => "auth",
            DataSourceError::Query(_) => "query",
            DataSourceError::Other(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("connection refused")
                    || lower.contains("connection reset")
                {
                    "network"
                } else if lower.contains("unauthorized")
                    || lower.contains("session expired")
                    || lower.contains("invalid credentials")
                {
                    "auth"
                } else {
                    "unknown"
                }
            }
        }
    }
}

/// No usable session, or the user backed out of signing in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("not signed in")]
    NoSession,
    #[error("sign-in cancelled")]
    Cancelled,
    #[error("sign-in rejected: {0}")]
    Rejected(String),
}

/// Executes queries against the tracking backend.
pub trait RemoteDataSource: Send {
    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Vec<Record>, DataSourceError>;

    fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
    ) -> Result<Option<Record>, DataSourceError> {
        Ok(self.find(entity_type, filters, fields)?.into_iter().next())
    }
}

/// Run a [`Query`] through a data source.
pub(crate) fn run_query(
    source: &dyn RemoteDataSource,
    query: &Query,
) -> Result<Vec<Record>, DataSourceError> {
    source.find(&query.entity_type, &query.filters, &query.fields)
}

/// An authenticated user session.
pub trait Session: Send + Sync {
    /// Login name, shown in the sign-out entry.
    fn user(&self) -> String;

    fn create_connection(&self) -> Result<Box<dyn RemoteDataSource>, DataSourceError>;
}

pub trait CredentialProvider: Send + Sync {
    /// The session currently held, if any. Never prompts; safe to call from
    /// the background poll thread.
    fn current_session(&self) -> Option<Arc<dyn Session>>;

    /// Obtain a session, prompting the user if needed. Host thread only.
    fn sign_in(&self) -> Result<Arc<dyn Session>, AuthError>;

    fn clear_session(&self);
}

/// Open a connection on the current session, or report why there is none.
pub(crate) fn connect(provider: &dyn CredentialProvider) -> Result<Box<dyn RemoteDataSource>, FetchSkip> {
    let session = provider.current_session().ok_or(FetchSkip::NoSession)?;
    session.create_connection().map_err(FetchSkip::Connect)
}

/// Why a fetch did not happen.
#[derive(Debug)]
pub(crate) enum FetchSkip {
    NoSession,
    Connect(DataSourceError),
}
