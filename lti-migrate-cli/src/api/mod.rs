//! Canvas LMS REST API module
//!
//! Only the endpoints the tool migration needs: account and term lookups,
//! external tool listing, course enumeration and course navigation tabs.

pub mod client;
pub mod constants;
pub mod error;
pub mod models;
pub mod pagination;
pub mod resilience;

pub use client::{CanvasApi, CanvasClient};
pub use error::ApiError;
pub use models::{Course, TabUpdate, ToolPlacement};
pub use resilience::ResilienceConfig;
