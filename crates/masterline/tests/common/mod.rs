//! Shared test utilities for masterline integration tests.
//!
//! - `TestHarness`: a temp storage root, an in-memory database and a
//!   pipeline wired to scripted collaborators
//! - `FakeMasteringTool` / `FakeEqEngine`: scripted stand-ins for the
//!   external mastering tool and EQ engine

pub mod fakes;
pub mod harness;

pub use fakes::{EqBehavior, FakeEqEngine, FakeMasteringTool, ToolBehavior};
pub use harness::TestHarness;
