//! Dispatch context propagation.
//!
//! The context attached to an inbound message is visible to host code for
//! the duration of that dispatch, including continuations that originate
//! inside it.

use crate::value::Value;

tokio::task_local! {
    static CURRENT_CONTEXT: Option<Value>;
}

/// The context attached to the inbound message currently being dispatched.
///
/// Returns `None` outside of a dispatch.
pub fn current_context() -> Option<Value> {
    CURRENT_CONTEXT.try_with(|c| c.clone()).unwrap_or(None)
}

/// Runs `f` with `context` installed as the current dispatch context.
pub(crate) async fn scope<F>(context: Option<Value>, f: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_CONTEXT.scope(context, f).await
}
