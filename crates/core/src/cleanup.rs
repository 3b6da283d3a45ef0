//! Compensating actions for multi-step pipelines
//!
//! Each externally visible side effect of a pipeline pushes the action that
//! undoes it. On failure the stack is unwound last-in first-out; a failing
//! action is logged and the remaining actions still run. On success the stack
//! is discarded without running anything.

use crate::errors::Result;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::future::Future;
use tracing::{debug, info, warn};

type Action<'a> = Box<dyn FnOnce() -> LocalBoxFuture<'a, Result<()>> + 'a>;

struct Compensation<'a> {
    name: String,
    action: Action<'a>,
}

/// Outcome of an unwind
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Actions that succeeded, in execution order
    pub completed: Vec<String>,
    /// Actions that failed with their error messages, in execution order
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// One warning line per failed action
    pub fn warnings(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(name, error)| format!("cleanup '{}' failed: {}", name, error))
            .collect()
    }
}

/// LIFO stack of named compensating actions
#[derive(Default)]
pub struct CleanupStack<'a> {
    actions: Vec<Compensation<'a>>,
}

impl<'a> CleanupStack<'a> {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Register the action undoing the side effect that just succeeded
    pub fn push<F, Fut>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + 'a,
        Fut: Future<Output = Result<()>> + 'a,
    {
        let name = name.into();
        debug!("Registered compensating action '{}'", name);
        self.actions.push(Compensation {
            name,
            action: Box::new(move || action().boxed_local()),
        });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names in push order
    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|c| c.name.as_str()).collect()
    }

    /// Run every action in reverse push order, continuing past failures
    pub async fn unwind(self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.actions.is_empty() {
            return report;
        }
        info!("Rolling back {} step(s)", self.actions.len());

        for compensation in self.actions.into_iter().rev() {
            match (compensation.action)().await {
                Ok(()) => {
                    debug!("Compensating action '{}' completed", compensation.name);
                    report.completed.push(compensation.name);
                }
                Err(e) => {
                    warn!("Compensating action '{}' failed: {}", compensation.name, e);
                    report.failed.push((compensation.name, e.to_string()));
                }
            }
        }
        report
    }

    /// Drop every action without running it; returns how many were dropped
    pub fn discard(self) -> usize {
        let count = self.actions.len();
        debug!("Discarding {} compensating action(s)", count);
        count
    }
}

impl std::fmt::Debug for CleanupStack<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupStack")
            .field("actions", &self.names())
            .finish()
    }
}
