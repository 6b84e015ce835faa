//! The election voting engine: validation, submission, tallying and
//! lifecycle, over an injected store, audit hook and clock.

pub mod answers;
pub mod eligibility;
pub mod lifecycle;
pub mod nomination;
pub mod results;
pub mod stv;
pub mod submission;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use rocket::tokio::time::{sleep, Duration};
use serde::Deserialize;

use crate::audit::{AuditDetails, AuditHook};
use crate::clock::Clock;
use crate::closer::ElectionClosers;
use crate::error::{Error, Result};
use crate::store::{Store, Transaction};

/// Tunables of the engine, taken from the application config.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Minimum length of a nomination justification, after trimming.
    #[serde(default = "EngineSettings::default_min_justification_length")]
    pub min_justification_length: usize,
    /// How many times a submission or transition waits for a busy election lock.
    #[serde(default = "EngineSettings::default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,
    /// Back-off before the first retry; later retries wait proportionally longer.
    #[serde(default = "EngineSettings::default_lock_retry_backoff_ms")]
    pub lock_retry_backoff_ms: u64,
    /// Key for the one-way pseudonyms written by anonymization.
    pub anonymization_key: String,
    /// Return internal error details to callers. Never enable in production.
    #[serde(default)]
    pub expose_internal_errors: bool,
    #[serde(default = "EngineSettings::default_page_size")]
    pub default_page_size: usize,
}

impl EngineSettings {
    fn default_min_justification_length() -> usize {
        10
    }

    fn default_lock_retry_attempts() -> u32 {
        5
    }

    fn default_lock_retry_backoff_ms() -> u64 {
        50
    }

    fn default_page_size() -> usize {
        50
    }

    pub fn new(anonymization_key: impl Into<String>) -> Self {
        Self {
            min_justification_length: Self::default_min_justification_length(),
            lock_retry_attempts: Self::default_lock_retry_attempts(),
            lock_retry_backoff_ms: Self::default_lock_retry_backoff_ms(),
            anonymization_key: anonymization_key.into(),
            expose_internal_errors: false,
            default_page_size: Self::default_page_size(),
        }
    }
}

/// Everything an operation needs, passed explicitly instead of living in globals.
///
/// Cheap to clone; clones share the same store, hooks and scheduled closers.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditHook>,
    clock: Arc<dyn Clock>,
    settings: Arc<EngineSettings>,
    closers: ElectionClosers,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditHook>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            settings: Arc::new(settings),
            closers: ElectionClosers::new(),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn closers(&self) -> &ElectionClosers {
        &self.closers
    }

    /// Emit an audit event for an operation that started at `started`.
    fn audit<T>(&self, action: &str, started: Instant, details: AuditDetails, result: &Result<T>) {
        self.audit_outcome(action, started, details, result.as_ref().err());
    }

    fn audit_outcome(
        &self,
        action: &str,
        started: Instant,
        mut details: AuditDetails,
        error: Option<&Error>,
    ) {
        details.insert(
            "duration_ms".to_string(),
            (started.elapsed().as_millis() as u64).into(),
        );
        if let Some(err) = error {
            details.insert("error".to_string(), err.kind().into());
            details.insert("message".to_string(), err.to_string().into());
        }
        self.audit.log_audit(action, error.is_none(), details);
    }

    /// Run `attempt` until it stops failing with a busy lock, waiting a little
    /// longer each time, up to the configured number of retries.
    async fn retry_on_contention<T, F, Fut>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && retries < self.settings.lock_retry_attempts => {
                    retries += 1;
                    debug!("Lock busy, retry {retries}: {err}");
                    let backoff = self.settings.lock_retry_backoff_ms * u64::from(retries);
                    sleep(Duration::from_millis(backoff)).await;
                }
                result => return result,
            }
        }
    }
}

/// Commit on success, roll back on failure. A failed rollback is only logged:
/// the store discards uncommitted work regardless.
async fn finish<T>(mut tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed after {err}: {rollback_err}");
            }
            Err(err)
        }
    }
}
