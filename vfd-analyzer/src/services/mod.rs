//! Pipeline services
//!
//! - Fingerprinter: content digest with metadata boxes excluded
//! - Media toolkit: probing, frame sampling, audio extraction
//! - Downloader: bounded remote fetch for URL submissions
//! - Result cache: idempotent fingerprint → result store

pub mod downloader;
pub mod fingerprinter;
pub mod media;
pub mod result_cache;

pub use downloader::VideoDownloader;
pub use fingerprinter::Fingerprinter;
pub use media::{FfmpegToolkit, FrameSpec, MediaToolkit};
pub use result_cache::{ResultCache, SqliteResultCache};
