//! Data Transfer Objects for REST request/response serialization.
//!
//! Timestamps are RFC 3339 strings; enums use their snake_case wire names.

pub mod event_dto;
pub mod workflow_dto;

pub use event_dto::*;
pub use workflow_dto::*;
