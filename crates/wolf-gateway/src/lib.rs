//! HTTP surface for health, key management, reports, prompts, and manual
//! ingestion. Every route is served at the root and under `/api/v1`.

mod api_error;
mod endpoints;
mod health_handlers;
mod ingestion_handlers;
mod prompt_handlers;
mod report_handlers;
mod server;

pub use server::{build_router, serve_gateway};
