//! E2E test harness for ckpt.
//!
//! Scenarios drive a real engine over a real git repository in a temp
//! directory. Some builders and assertions exist for scenarios still to be
//! written.

#![allow(dead_code)]

pub mod assertions;
pub mod clock;
pub mod scenario;
pub mod steps;

// Re-export commonly used types
pub use assertions::{Assertion, ErrorMatch};
pub use clock::MockClock;
pub use runner::DEFAULT_SESSION;
pub use scenario::Scenario;
pub use workspace::TestWorkspace;
