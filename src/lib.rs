//! HAGGLER: market-priced haggling assistant
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod surface;
pub mod engine;
pub mod storage;
