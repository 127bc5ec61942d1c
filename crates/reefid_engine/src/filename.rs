use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::AssetReference;

/// Extension of pending-record documents.
pub(crate) const RECORD_EXTENSION: &str = "json";

/// Deterministic, path-safe document name for a pending record: `{hash(asset)}.json`.
pub(crate) fn record_filename(asset: &AssetReference) -> String {
    format!("{}.{RECORD_EXTENSION}", short_hash(asset.as_str().as_bytes(), 12))
}

/// Content-addressed name for a stored photo: `photo-{hash(bytes)}.jpg`.
pub(crate) fn photo_filename(bytes: &[u8]) -> String {
    format!("photo-{}.jpg", short_hash(bytes, 8))
}

/// Library references are bare file names; anything that could escape the directory is refused.
pub(crate) fn is_safe_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference != "."
        && reference != ".."
        && !reference
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '\0'))
}

fn short_hash(input: &[u8], byte_len: usize) -> String {
    let digest = Sha256::digest(input);
    let mut hex = String::with_capacity(byte_len * 2);
    for byte in digest.iter().take(byte_len) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
