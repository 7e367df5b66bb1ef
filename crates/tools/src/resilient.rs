//! Primary/backup failover over a single capability.
//!
//! [`Resilient<T>`] calls the primary provider and, only if that call fails,
//! calls the backup exactly once. The backup's result (success or error) is
//! returned verbatim. Each capability trait is implemented for
//! `Resilient<dyn Trait>`, so a pair can itself serve as a primary or backup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use quill_observability::ActivityLog;

use crate::error::ToolError;

pub struct Resilient<T: ?Sized> {
    capability: String,
    primary: Arc<T>,
    backup: Option<Arc<T>>,
    attempt_timeout: Option<Duration>,
    activity: Option<Arc<dyn ActivityLog>>,
}

impl<T: ?Sized> Clone for Resilient<T> {
    fn clone(&self) -> Self {
        Self {
            capability: self.capability.clone(),
            primary: Arc::clone(&self.primary),
            backup: self.backup.clone(),
            attempt_timeout: self.attempt_timeout,
            activity: self.activity.clone(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Resilient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resilient")
            .field("capability", &self.capability)
            .field("has_backup", &self.backup.is_some())
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl<T: ?Sized + Send + Sync> Resilient<T> {
    pub fn new(capability: impl Into<String>, primary: Arc<T>) -> Self {
        Self {
            capability: capability.into(),
            primary,
            backup: None,
            attempt_timeout: None,
            activity: None,
        }
    }

    pub fn with_backup(mut self, backup: Arc<T>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_optional_backup(mut self, backup: Option<Arc<T>>) -> Self {
        self.backup = backup;
        self
    }

    /// Bound each attempt (primary and backup separately).
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Report fallbacks to an operator-visible activity log.
    pub fn with_activity(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Run `op` against the primary, falling back to the backup on error.
    pub async fn invoke<'a, R, F, Fut>(&'a self, op: F) -> Result<R, ToolError>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = Result<R, ToolError>>,
    {
        let primary_err = match self.attempt(op(&*self.primary)).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(backup) = &self.backup else {
            tracing::warn!(capability = %self.capability, error = %primary_err, "primary provider failed, no backup configured");
            return Err(primary_err);
        };

        tracing::warn!(capability = %self.capability, error = %primary_err, "primary provider failed, falling back to backup");
        if let Some(activity) = &self.activity {
            activity.warn(format!(
                "{} primary failed ({primary_err}), using backup",
                self.capability
            ));
        }

        self.attempt(op(&**backup)).await
    }

    async fn attempt<R, Fut>(&self, fut: Fut) -> Result<R, ToolError>
    where
        Fut: Future<Output = Result<R, ToolError>>,
    {
        match self.attempt_timeout {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| ToolError::Timeout {
                    capability: self.capability.clone(),
                    after,
                })?,
            None => fut.await,
        }
    }
}
