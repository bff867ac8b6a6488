//! Audit anchoring
//!
//! A finished AnalysisResult can be recorded on an external ledger as
//! tamper-evidence. Anchoring is best-effort: failures end up in the
//! append-only anchor log and never block returning the result.

pub mod ledger;
pub mod submitter;

pub use ledger::{AnchorPayload, HttpLedgerClient, LedgerClient, LedgerError};
pub use submitter::{result_checksum, AnchorSubmitter};
