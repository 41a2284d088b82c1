//! Optional pre-upload source transformation.
//!
//! The device runs a constrained interpreter; toolchains that target it can
//! hook a transformation in here. Only uploads of qualifying extensions
//! pass through the transform, and verification hashes the transformed
//! bytes, never the on-disk source.
//!
//! The local scanner observes qualifying files through the same transform,
//! so after a clean upload the local snapshot, the device listing and the
//! base snapshot all carry the transformed hash. Transforms must therefore
//! be deterministic; a nondeterministic transform would show phantom
//! changes on every run.

use crate::error::Result;

/// Extensions eligible for transformation.
pub const QUALIFYING_EXTENSIONS: &[&str] = &["js", "mjs"];

pub trait Transpiler: Send + Sync {
    /// Whether this file should be transformed before upload.
    fn qualifies(&self, path: &str) -> bool {
        extension_qualifies(path)
    }

    fn transform(&self, path: &str, source: Vec<u8>) -> Result<Vec<u8>>;
}

pub fn extension_qualifies(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| QUALIFYING_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Identity transform; keeps the extension gate and the post-transform
/// hashing path exercised without altering content.
pub struct Passthrough;

impl Transpiler for Passthrough {
    fn transform(&self, _path: &str, source: Vec<u8>) -> Result<Vec<u8>> {
        Ok(source)
    }
}
