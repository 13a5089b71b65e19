//! Command-line and environment configuration for the wolf server.
//!
//! Every flag has an environment fallback. `Cli::into_service_config`
//! produces the typed `ServiceConfig`; downstream crates never read the
//! environment themselves.

pub mod cli_args;

pub use cli_args::Cli;
