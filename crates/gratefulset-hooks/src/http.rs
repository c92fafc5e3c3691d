//! HTTP scale hook — POSTs the hook context to an endpoint on the pod.
//!
//! The request body is the JSON-encoded [`HookContext`] plus a `direction`
//! field. A 2xx response means the pod accepted; anything else is
//! [`HookError::Rejected`].

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use serde::Serialize;
use tracing::debug;

use crate::{HookContext, HookError, HookFuture, ScaleHook};

#[derive(Serialize)]
struct HookRequest<'a> {
    direction: &'static str,
    #[serde(flatten)]
    context: &'a HookContext,
}

/// Calls `http://{host}:{port}{path}` on the pod being scaled.
#[derive(Debug, Clone)]
pub struct HttpHook {
    port: u16,
    scale_down_path: String,
    scale_up_path: Option<String>,
    timeout: Duration,
}

impl HttpHook {
    pub fn new(
        port: u16,
        scale_down_path: impl Into<String>,
        scale_up_path: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            port,
            scale_down_path: scale_down_path.into(),
            scale_up_path,
            timeout,
        }
    }

    async fn post(&self, ctx: &HookContext, path: &str, direction: &'static str) -> Result<(), HookError> {
        let address = format!("{}:{}", ctx.host, self.port);
        let uri = format!("http://{address}{path}");
        let body = serde_json::to_vec(&HookRequest {
            direction,
            context: ctx,
        })
        .map_err(|e| HookError::Request(e.to_string()))?;

        let call = async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| HookError::Connect(e.to_string()))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| HookError::Connect(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("POST")
                .uri(&uri)
                .header("host", &address)
                .header("content-type", "application/json")
                .header("user-agent", "gratefulset-controller/0.1")
                .body(Full::new(Bytes::from(body)))
                .map_err(|e| HookError::Request(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| HookError::Request(e.to_string()))?;

            if resp.status().is_success() {
                Ok(())
            } else {
                Err(HookError::Rejected {
                    status: resp.status().as_u16(),
                })
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => {
                debug!(%uri, direction, ok = result.is_ok(), "scale hook called");
                result
            }
            Err(_) => {
                debug!(%uri, direction, "scale hook timed out");
                Err(HookError::Timeout(self.timeout))
            }
        }
    }
}

impl ScaleHook for HttpHook {
    fn name(&self) -> &'static str {
        "http"
    }

    fn scale_down<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(self.post(ctx, &self.scale_down_path, "scale_down"))
    }

    fn scale_up<'a>(&'a self, ctx: &'a HookContext) -> HookFuture<'a> {
        Box::pin(async move {
            match &self.scale_up_path {
                Some(path) => self.post(ctx, path, "scale_up").await,
                None => Ok(()),
            }
        })
    }
}
