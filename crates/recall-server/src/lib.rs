//! HTTP/JSON remote authority for recall devices.
//!
//! Devices push their unsynchronized operations and pull everything other
//! devices wrote since their high-water mark. The authority assigns the
//! global logical clock, keeps deletion records forever and refuses to
//! resurrect deleted rows. This crate contains the sync service, the
//! per-account registry, API error handling, and route definitions.

pub mod error;
pub mod handlers;
pub mod router;
pub mod schema;
pub mod service;
pub mod state;
