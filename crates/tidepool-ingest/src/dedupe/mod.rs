//! Duplicate handling.
//!
//! - [`DuplicateDetector`]: exact-hash upsert, provenance and trust scores
//! - [`NearDuplicateDetector`]: fingerprint and catalog-id clustering

mod advanced;
mod basic;

pub use advanced::{
    DedupGroup, DedupStats, DuplicateKind, DuplicateMatch, GroupMember, NearDuplicateDetector,
    release_similarity,
};
pub use basic::{
    BASE_TRUST, DuplicateDetector, ProcessOutcome, PurgeReport, TRUSTED_PUBLISHER_BONUS,
    UPLOAD_TRUST_INCREMENT, UploadRecord,
};
