//! Teardown bookkeeping.
//!
//! Every step that creates something outside this process registers the
//! matching teardown right after the creation succeeds. The stack is run once,
//! at the very end, in reverse registration order, whether the run passed or
//! failed. Teardown failures are logged and never change the run's result.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use tracing::{info, warn};

use crate::Error;

type CleanupFuture = BoxFuture<'static, Result<(), Error>>;
type CleanupAction = Box<dyn FnOnce(bool) -> CleanupFuture + Send>;

/// When a registered teardown is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Always runs.
    Always,
    /// Skipped when the run failed and the suite asked to keep resources
    /// around for debugging.
    RetainOnFailure,
}

struct Entry {
    label: String,
    policy: CleanupPolicy,
    action: CleanupAction,
}

/// What happened when the stack was drained.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Labels in execution order.
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub retained: Vec<String>,
}

pub struct CleanupStack {
    entries: Vec<Entry>,
    no_cleanup_on_failure: bool,
}

impl CleanupStack {
    pub fn new(no_cleanup_on_failure: bool) -> Self {
        Self {
            entries: Vec::new(),
            no_cleanup_on_failure,
        }
    }

    /// Registers a teardown. The action receives whether the run failed.
    pub fn register<F, Fut>(&mut self, label: impl Into<String>, policy: CleanupPolicy, action: F)
    where
        F: FnOnce(bool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.entries.push(Entry {
            label: label.into(),
            policy,
            action: Box::new(move |failed| action(failed).boxed()),
        });
    }

    pub fn always<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce(bool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.register(label, CleanupPolicy::Always, action);
    }

    pub fn retain_on_failure<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce(bool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.register(label, CleanupPolicy::RetainOnFailure, action);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    /// Drains the stack, newest entry first.
    pub async fn run(mut self, failed: bool) -> CleanupReport {
        let mut report = CleanupReport::default();
        let retain = failed && self.no_cleanup_on_failure;

        while let Some(entry) = self.entries.pop() {
            if retain && entry.policy == CleanupPolicy::RetainOnFailure {
                info!(resource = %entry.label, "keeping resource for debugging");
                report.retained.push(entry.label);
                continue;
            }

            match (entry.action)(failed).await {
                Ok(()) => {
                    info!(resource = %entry.label, "cleaned up");
                    report.completed.push(entry.label);
                }
                Err(e) => {
                    warn!(resource = %entry.label, error = %e, "cleanup failed");
                    report.failed.push(entry.label);
                }
            }
        }
        report
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let leaked: Vec<&str> = self.labels().collect();
            warn!(?leaked, "cleanup stack dropped without running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(log: &Arc<Mutex<Vec<String>>>, label: &str, stack: &mut CleanupStack, policy: CleanupPolicy) {
        let log = log.clone();
        let label_owned = label.to_string();
        stack.register(label, policy, move |_| async move {
            log.lock().unwrap().push(label_owned);
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_runs_in_reverse_order() {
        let log = recorder();
        let mut stack = CleanupStack::new(false);
        push(&log, "rbac", &mut stack, CleanupPolicy::Always);
        push(&log, "vault-ca-secret", &mut stack, CleanupPolicy::Always);
        push(&log, "consul-release", &mut stack, CleanupPolicy::RetainOnFailure);

        let report = stack.run(false).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["consul-release", "vault-ca-secret", "rbac"]
        );
        assert_eq!(report.completed, vec!["consul-release", "vault-ca-secret", "rbac"]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_entries() {
        let log = recorder();
        let mut stack = CleanupStack::new(false);
        push(&log, "first", &mut stack, CleanupPolicy::Always);
        stack.always("broken", |_| async { Err(Error::unexpected("boom")) });
        push(&log, "last", &mut stack, CleanupPolicy::Always);

        let report = stack.run(true).await;

        assert_eq!(*log.lock().unwrap(), vec!["last", "first"]);
        assert_eq!(report.failed, vec!["broken"]);
    }

    #[tokio::test]
    async fn test_retains_only_on_failure_when_requested() {
        let log = recorder();
        let mut stack = CleanupStack::new(true);
        push(&log, "rbac", &mut stack, CleanupPolicy::Always);
        push(&log, "consul-release", &mut stack, CleanupPolicy::RetainOnFailure);
        let report = stack.run(true).await;
        assert_eq!(*log.lock().unwrap(), vec!["rbac"]);
        assert_eq!(report.retained, vec!["consul-release"]);

        let log = recorder();
        let mut stack = CleanupStack::new(true);
        push(&log, "consul-release", &mut stack, CleanupPolicy::RetainOnFailure);
        let report = stack.run(false).await;
        assert_eq!(*log.lock().unwrap(), vec!["consul-release"]);
        assert!(report.retained.is_empty());
    }

    #[tokio::test]
    async fn test_action_sees_failed_flag() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let mut stack = CleanupStack::new(false);
        stack.always("debug-dump", move |failed| async move {
            *s.lock().unwrap() = Some(failed);
            Ok(())
        });
        stack.run(true).await;
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }
}
