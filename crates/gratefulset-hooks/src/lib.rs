//! gratefulset-hooks — application callbacks around a scale step.
//!
//! A [`ScaleHook`] has two operations. `scale_down` asks the pod about to be
//! removed to make its in-flight state durable and stop; `scale_up` tells a
//! freshly admitted, ready pod that it now holds its ordinal. Both are
//! idempotent: the controller re-invokes them after a crash or a timeout.
//!
//! Adapters:
//! - [`NoopHook`] accepts immediately,
//! - [`HttpHook`] POSTs to an endpoint on the pod,
//! - a pod-exit hook supplied by the local pod-group driver, registered with
//!   [`DefaultHookFactory::with_pod_exit`].

pub mod factory;
pub mod http;

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;

pub use factory::{DefaultHookFactory, HookFactory};
pub use http::HttpHook;

/// Boxed future returned by hook operations.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>;

/// Errors a hook call can fail with. All are retried by the controller.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("hook connection failed: {0}")]
    Connect(String),

    #[error("hook rejected with status {status}")]
    Rejected { status: u16 },

    #[error("hook request failed: {0}")]
    Request(String),

    #[error("hook unsupported: {0}")]
    Unsupported(String),
}

/// Identifies the pod a hook call is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookContext {
    pub workload_id: String,
    pub pool: String,
    /// Logical ordinal within the workload.
    pub ordinal: u32,
    pub pod_name: String,
    /// Stable network name of the pod, `{pod}.{service}`.
    pub host: String,
}

/// Capability the scale coordinator is handed for one workload.
pub trait ScaleHook: Send + Sync {
    /// Short adapter name for logs and status.
    fn name(&self) -> &'static str;

    /// Ask the pod to flush its state and stop serving.
    fn scale_down<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a>;

    /// Tell a newly admitted pod it is part of the workload.
    fn scale_up<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a>;

    /// Whether an accepted `scale_down` makes the pod stop serving.
    ///
    /// When false the coordinator lowers the pool's replicas as soon as the
    /// hook is accepted, while the target pod may still be ready. Such an
    /// adapter gives up the drain guarantee: nothing waits for the pod to
    /// settle, so any state it has not made durable by the time the hook
    /// returns is lost.
    fn stops_pod(&self) -> bool {
        true
    }
}

/// Hook that accepts every transition without contacting the pod.
///
/// Does not stop the pod, so a scale-down removes it without a drain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl ScaleHook for NoopHook {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn scale_down<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn scale_up<'a>(&'a self, _ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn stops_pod(&self) -> bool {
        false
    }
}
