//! Testing utilities and mock implementations
//!
//! In-memory stand-ins for the session transport and credential store so the
//! supervisor can be exercised without a remote service or a disk.

pub mod mocks;

pub use mocks::*;
