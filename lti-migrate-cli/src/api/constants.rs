//! Canvas API constants

use std::time::Duration;

/// REST prefix appended to the configured Canvas URL
pub const API_PREFIX: &str = "/api/v1";

/// Page size for list endpoints
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Course navigation tab ids for LTI tools carry this prefix before the tool id
pub const EXTERNAL_TOOL_TAB_PREFIX: &str = "context_external_tool_";

pub const USER_AGENT: &str = concat!("lti-migrate/", env!("CARGO_PKG_VERSION"));
