//! Testing utilities for tflite-bridge.
//!
//! Mocks and fixtures for exercising the loader and sessions without a real
//! engine or model files.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tflite_bridge::testing::{fixtures, mocks};
//!
//! let engine = mocks::MockEngine::new();
//! let tracker = fixtures::BufferTracker::new();
//! let fetcher = fixtures::tracked_fetcher(tracker.clone(), fixtures::model_bytes());
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
