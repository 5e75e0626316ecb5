#![feature(int_roundings)]
//! `coursepulse-core` — shared domain primitives.
//!
//! Strongly-typed identifiers and the reporting-week calendar math used by the
//! scheduler and the notification payloads. No infrastructure concerns here.

pub mod calendar;
pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AllocationId, FacilitatorId, ManagerId, UserId};
