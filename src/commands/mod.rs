//! Handlers behind each CLI verb.

pub mod device;
pub mod dfu;
pub mod firmware;
pub mod settings;
