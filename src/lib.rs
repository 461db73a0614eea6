//! Milestone Oracle Server Library
//!
//! Verifies campaign milestones against pluggable oracles, reaches consensus
//! across sources, and resolves conditional pledges into release and refund
//! amounts.

pub mod app_state;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oracle;
pub mod routes;
pub mod services;
