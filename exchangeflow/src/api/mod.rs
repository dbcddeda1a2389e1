//! HTTP surface.
//!
//! | Method | Path                | Purpose                                  |
//! |--------|---------------------|------------------------------------------|
//! | POST   | `/jobs`             | Validate and enqueue an exchange set job |
//! | GET    | `/jobs/{id}`        | Read a job                               |
//! | GET    | `/jobs/{id}/status` | Read a build status record               |
//! | POST   | `/jobs/{id}/status` | Append one worker step status            |
//! | GET    | `/health`           | Liveness                                 |

mod error;
mod handlers;
mod state;

pub use error::{ApiError, ApiResult};
pub use handlers::{StatusReport, SubmitResponse};
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs", post(handlers::submit_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route(
            "/jobs/{id}/status",
            get(handlers::get_status).post(handlers::report_status),
        )
        .with_state(state)
}
