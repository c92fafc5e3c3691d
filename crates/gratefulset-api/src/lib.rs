//! gratefulset-api — REST API for GratefulSet.
//!
//! Workload ids have the form `{namespace}/{name}`; in paths the slash is
//! percent-encoded (`default%2Fingester`).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/workloads` | List all workloads |
//! | POST | `/api/v1/workloads` | Create or replace a workload |
//! | GET | `/api/v1/workloads/{id}` | Get a workload |
//! | DELETE | `/api/v1/workloads/{id}` | Delete a workload and everything it owns |
//! | POST | `/api/v1/workloads/{id}/scale` | Set the target replica count |
//! | GET | `/api/v1/workloads/{id}/status` | Reconciler status |
//! | GET | `/api/v1/workloads/{id}/pools` | Pools, oldest first |
//! | GET | `/api/v1/workloads/{id}/pods` | Pods across pools |
//! | GET | `/api/v1/workloads/{id}/ledger` | Lock ledger |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use gratefulset_state::LocalSubstrate;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub substrate: LocalSubstrate,
}

/// Build the API router.
pub fn build_router(substrate: LocalSubstrate) -> Router {
    let api_state = ApiState { substrate };

    let api_routes = Router::new()
        .route("/workloads", get(handlers::list_workloads).post(handlers::put_workload))
        .route("/workloads/{id}", get(handlers::get_workload).delete(handlers::delete_workload))
        .route("/workloads/{id}/scale", post(handlers::scale_workload))
        .route("/workloads/{id}/status", get(handlers::get_status))
        .route("/workloads/{id}/pools", get(handlers::list_pools))
        .route("/workloads/{id}/pods", get(handlers::list_pods))
        .route("/workloads/{id}/ledger", get(handlers::get_ledger))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
