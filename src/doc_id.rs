use std::path::Path;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Ids and fingerprints are persisted, so the hash must not
/// change between builds.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Length of the short hex form shown to users.
pub const SHORT_ID_LEN: usize = 8;

/// A stable document identifier derived from the document's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentId {
    pub numeric: u64,
    /// The short hex string for human display (e.g. "a1b2c3d4").
    pub short: String,
}

impl DocumentId {
    /// Generate a stable document ID from a (canonical) file path.
    pub fn from_path(path: &Path) -> Self {
        Self::from_numeric(fnv1a_64(path.to_string_lossy().as_bytes()))
    }

    pub fn from_numeric(numeric: u64) -> Self {
        let short = Self::full_hex(numeric)[..SHORT_ID_LEN].to_string();
        Self { numeric, short }
    }

    fn full_hex(value: u64) -> String {
        format!("{value:016x}")
    }

    /// The full 16 character hex key. Chunks reference their document by
    /// this key.
    pub fn key(&self) -> String {
        Self::full_hex(self.numeric)
    }

    /// Parse a full hex key back into an id.
    pub fn parse_key(key: &str) -> Option<Self> {
        if key.len() != 16 {
            return None;
        }
        u64::from_str_radix(key, 16).ok().map(Self::from_numeric)
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short)
    }
}

/// Hash of a file's raw bytes, used to notice that a re-added document has
/// not changed.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    format!("{:016x}", fnv1a_64(bytes))
}
