//! Shared test utilities for transcriptor integration tests.
//!
//! - `TestHarness` wires an orchestrator to temp storage and a fake runtime
//! - `FakeRuntime` plays back scripted worker behaviour

#![allow(dead_code)]

pub mod fake_runtime;
pub mod harness;

pub use fake_runtime::{FakeRuntime, Script};
pub use harness::{TestHarness, MP3_BYTES};
