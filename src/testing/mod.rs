//! Testing utilities and mock implementations
//!
//! Mocks for exercising the node without a broker or a network interface.

pub mod mocks;

pub use mocks::*;
