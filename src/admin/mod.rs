//! Admin back office: upstream configuration, reporting and user management.

pub mod handlers;
pub mod reporting;
mod store;

pub use reporting::{AdminStats, PlanCounts, Reporting};
pub use store::AdminConfigStore;
