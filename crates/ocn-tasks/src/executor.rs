//! Task execution backends (spec §4.7). The default policy runs an
//! MCP-only attempt first, falling back to a broader web/exec-capable
//! executor only if the first stage can't make progress — grounded on
//! the original service's pluggable `executor` callable, generalized to
//! a two-stage trait object chain.

use async_trait::async_trait;
use ocn_domain::Result;
use serde_json::Value;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `goal` to completion and return its result payload. Errors
    /// here are recorded verbatim as the task's `error` field.
    async fn execute(&self, goal: &str, session_id: &str) -> anyhow::Result<Value>;
}

/// Tries `primary` (e.g. MCP-tool-only agent loop) and only calls
/// `fallback` (e.g. full web/exec-capable loop) when the primary stage
/// reports it made no usable progress via [`StageOutcome::NoProgress`].
pub struct TwoStageExecutor {
    pub primary: std::sync::Arc<dyn StagedExecutor>,
    pub fallback: std::sync::Arc<dyn StagedExecutor>,
}

#[derive(Debug)]
pub enum StageOutcome {
    Done(Value),
    NoProgress,
}

#[async_trait]
pub trait StagedExecutor: Send + Sync {
    async fn attempt(&self, goal: &str, session_id: &str) -> anyhow::Result<StageOutcome>;
}

#[async_trait]
impl TaskExecutor for TwoStageExecutor {
    async fn execute(&self, goal: &str, session_id: &str) -> anyhow::Result<Value> {
        match self.primary.attempt(goal, session_id).await? {
            StageOutcome::Done(v) => Ok(v),
            StageOutcome::NoProgress => match self.fallback.attempt(goal, session_id).await? {
                StageOutcome::Done(v) => Ok(v),
                StageOutcome::NoProgress => Err(anyhow::anyhow!("no executor stage could make progress on goal")),
            },
        }
    }
}

/// Wraps a plain async closure as a [`TaskExecutor`], used by tests and
/// by simple deployments that don't need the two-stage policy.
pub struct ClosureExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> TaskExecutor for ClosureExecutor<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, goal: &str, session_id: &str) -> anyhow::Result<Value> {
        (self.0)(goal.to_string(), session_id.to_string()).await
    }
}

#[allow(dead_code)]
fn _assert_object_safe(_: &dyn TaskExecutor) -> Result<()> {
    Ok(())
}
