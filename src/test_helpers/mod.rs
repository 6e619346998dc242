//! Shared fixtures for unit tests.

pub mod fixtures;
pub mod sim;
pub mod temp;
