//! # VFD Common Library
//!
//! Shared code for VFD services including:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Tracing initialization
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod sse;

pub use error::{Error, Result};
