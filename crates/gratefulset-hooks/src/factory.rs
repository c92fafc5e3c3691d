//! Resolve a workload's hook configuration into a [`ScaleHook`].

use std::sync::Arc;
use std::time::Duration;

use gratefulset_state::{GratefulSet, HookConfig};

use crate::{HookError, HttpHook, NoopHook, ScaleHook};

/// Builds the hook the coordinator should use for a workload.
pub trait HookFactory: Send + Sync {
    fn hook_for(&self, workload: &GratefulSet) -> Result<Arc<dyn ScaleHook>, HookError>;
}

/// Maps [`HookConfig`] variants onto the built-in adapters.
#[derive(Clone)]
pub struct DefaultHookFactory {
    default_timeout: Duration,
    pod_exit: Option<Arc<dyn ScaleHook>>,
}

impl DefaultHookFactory {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            pod_exit: None,
        }
    }

    /// Register the adapter used for [`HookConfig::PodExit`].
    pub fn with_pod_exit(mut self, hook: Arc<dyn ScaleHook>) -> Self {
        self.pod_exit = Some(hook);
        self
    }
}

impl HookFactory for DefaultHookFactory {
    fn hook_for(&self, workload: &GratefulSet) -> Result<Arc<dyn ScaleHook>, HookError> {
        match &workload.hooks {
            HookConfig::Noop => Ok(Arc::new(NoopHook)),
            HookConfig::Http {
                port,
                scale_down_path,
                scale_up_path,
                timeout_secs,
            } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_timeout);
                Ok(Arc::new(HttpHook::new(
                    *port,
                    scale_down_path.clone(),
                    scale_up_path.clone(),
                    timeout,
                )))
            }
            HookConfig::PodExit => self.pod_exit.clone().ok_or_else(|| {
                HookError::Unsupported("pod_exit hook requires the local pod-group driver".into())
            }),
        }
    }
}
