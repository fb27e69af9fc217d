//! REST surface for the geochart datapack service.
//!
//! Thin HTTP wiring over the storage core: route handlers translate
//! requests into store / ingest / encryption-cache calls and map their
//! errors onto status codes. The authenticated caller arrives as trusted
//! `x-user-uuid` / `x-admin` headers set by the upstream auth proxy.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

pub use auth::AuthContext;
pub use config::ServiceConfig;
pub use routes::{build_router, AppState};
