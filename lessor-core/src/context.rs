//! Execution context: who a piece of work runs as.
//!
//! Functions that act on behalf of a caller take a [`RequestContext`]
//! explicitly. In addition, a task may *bind* a context with [`scope`] so that
//! code deep inside a plugin can read it back with [`current`]; the binding
//! lives exactly as long as the scoped future and is gone once it finishes,
//! whether it succeeded, failed or panicked.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;

use crate::error::ContextError;

tokio::task_local! {
    static CURRENT_CONTEXT: RequestContext;
}

/// Role that lifts project scoping on reads
pub const ADMIN_ROLE: &str = "admin";

/// Identity and authorization of a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub auth_token: Option<String>,
    #[serde(default)]
    pub service_catalog: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Set when this context was obtained by redeeming a trust
    #[serde(default)]
    pub trust_id: Option<String>,
    /// The user who issued the trust, for redeemed contexts
    #[serde(default)]
    pub trustor_user_id: Option<String>,
}

impl RequestContext {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }
}

/// Run `future` with `ctx` bound as the current context of this task.
pub async fn scope<F>(ctx: RequestContext, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_CONTEXT.scope(ctx, future).await
}

/// The context bound to the running task.
pub fn current() -> Result<RequestContext, ContextError> {
    CURRENT_CONTEXT
        .try_with(Clone::clone)
        .map_err(|_| ContextError::Unavailable)
}

pub fn has_context() -> bool {
    CURRENT_CONTEXT.try_with(|_| ()).is_ok()
}

/// Spawn a background task bound to `ctx`.
///
/// The task receives its own copy of the context and the binding ends with
/// the task. A failure is logged under `description` and handed back through
/// the returned handle.
pub fn spawn<F, Fut, T, E>(
    description: impl Into<String>,
    ctx: RequestContext,
    task: F,
) -> JoinHandle<Result<T, E>>
where
    F: FnOnce(RequestContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let description = description.into();
    let bound = ctx.clone();
    tokio::spawn(CURRENT_CONTEXT.scope(bound, async move {
        let result = task(ctx).await;
        if let Err(e) = &result {
            tracing::error!(task = %description, error = %e, "Background task failed");
        }
        result
    }))
}
