//! shipcheck - end-to-end release checks
//!
//! Publishes a package to a local registry under a throwaway version and
//! runs the browser test suite of each example project against it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod example;
pub mod fsutil;
pub mod manifest;
pub mod pipeline;
pub mod process;
pub mod publish;
pub mod readiness;
pub mod registry;
pub mod ui;

pub use error::{ShipcheckError, ShipcheckResult};
