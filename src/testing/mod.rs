//! Test doubles for running the node without hardware or a broker

pub mod mocks;

pub use mocks::*;
