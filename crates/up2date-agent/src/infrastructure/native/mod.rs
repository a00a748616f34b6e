//! Native connection module adapters.
//!
//! The real module is a vendor library linked by the deployment build; this
//! crate ships a recording mock used by tests and by headless runs.

pub mod mock;
