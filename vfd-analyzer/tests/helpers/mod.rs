//! Test Helper Utilities
//!
//! Shared utilities for testing vfd-analyzer

#![allow(dead_code)]

pub mod service;
pub mod stubs;

pub use service::{
    admitted_job, build_service, test_config, upload, video_bytes, wait_terminal, TestService,
};
pub use stubs::{adapters, StubAdapter, StubLedger, StubMedia};
