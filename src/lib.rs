//! ROUNDBOT — Autonomous epoch-based prediction market agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod ledger;
pub mod strategy;
pub mod engine;
