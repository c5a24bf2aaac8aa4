//! Integration tests for sharepilot.
//!
//! Everything here runs against in-memory fakes of the cluster and clients
//! under tokio's paused clock, so retry and poll budgets are checked in
//! virtual time.
//!
//! Run with: `cargo test --test integration`

mod fakes;
mod failover;
mod lifecycle;
mod polling;
mod property_tests;
mod teardown;
