//! Shared types for frame-keeper: the frame model, the Top-K selector, the
//! binary record log and configuration.
pub mod config;
pub mod frame;
pub mod record;
pub mod selector;
