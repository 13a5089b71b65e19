//! Route paths served at the root and again under `API_V1_PREFIX`.

pub(crate) const API_V1_PREFIX: &str = "/api/v1";

pub(crate) const HEALTH_ENDPOINT: &str = "/health";
pub(crate) const HEALTH_VERBOSE_ENDPOINT: &str = "/health/verbose";
pub(crate) const KEY_STATUS_ENDPOINT: &str = "/key_status";
pub(crate) const SET_KEYS_ENDPOINT: &str = "/set_keys";
pub(crate) const REPORTS_ENDPOINT: &str = "/reports";
pub(crate) const REPORT_DETAIL_ENDPOINT: &str = "/reports/{report_id}";
pub(crate) const REPORT_REQUEUE_ENDPOINT: &str = "/reports/{report_id}/requeue";
pub(crate) const PROMPT_TEMPLATES_ENDPOINT: &str = "/prompts/templates";
pub(crate) const PROMPT_TEMPLATE_DETAIL_ENDPOINT: &str = "/prompts/templates/{name}";
pub(crate) const PROMPT_CONVERSATION_ENDPOINT: &str = "/prompts/conversations/{session_id}";
pub(crate) const INGESTION_RUN_ENDPOINT: &str = "/ingestion/run";

pub(crate) const DEFAULT_LIST_LIMIT: usize = 100;
pub(crate) const MAX_LIST_LIMIT: usize = 500;
