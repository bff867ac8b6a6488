//! Utility modules for vfd-analyzer

pub mod db_retry;

pub use db_retry::retry_on_lock;
