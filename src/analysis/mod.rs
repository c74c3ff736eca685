//! Repository analysis: snapshot model, content hashing, incremental state,
//! and the built-in static-analysis step.

pub mod hashing;
pub mod incremental;
pub mod scan;
pub mod snapshot;

pub use hashing::{analysis_fingerprint, hash_files, sha256_hex, FileHashes};
pub use incremental::{AnalysisCache, ChangedFileSet};
pub use scan::{scan_repository, ScanOutput};
pub use snapshot::{AnalysisSnapshot, EntryKind, FileEntry};
