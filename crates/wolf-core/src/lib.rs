//! Foundational low-level utilities shared across Wolf crates.
//!
//! Provides time helpers, environment value normalization, stable identifier
//! derivation, and error-text truncation used by the ingestion stack.

pub mod env_value;
pub mod ids;
pub mod text;
pub mod time_utils;

pub use env_value::normalize_env_value;
pub use ids::{derive_report_id, short_digest};
pub use text::truncate_for_error;
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix};
