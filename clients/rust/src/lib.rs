//! Rust client for the Verdant usage gateway.
//!
//! The [`UsageController`] mediates between UI action triggers and the
//! gateway's quota engine: check admission before a metered action, report
//! the usage commit after it succeeds, and render upgrade prompts from the
//! cached usage snapshot.

pub mod controller;
mod error;

pub use controller::{ControllerConfig, Feature, UsageController, UsageSnapshot};
pub use error::Error;
