//! Test support for the Slipway workspace: in-memory implementations of
//! the store ports, recording executor/SCM fakes, fixture factories, and
//! a pre-wired [`context::TestContext`].

pub mod context;
pub mod fakes;
pub mod fixtures;
pub mod memory;
