//! Management HTTP surface.
//!
//! # Data Flow
//! ```text
//! Request
//!     → server.rs (Axum router, trace + timeout layers)
//!     → handlers.rs (health, webhook subscriptions)
//!       or admin (bearer auth → breaker / cache / registry views)
//!     → response.rs (errors → status + JSON body)
//! ```

pub mod handlers;
pub mod response;
pub mod server;

pub use response::ApiError;
pub use server::{build_router, AppState, HttpServer};
