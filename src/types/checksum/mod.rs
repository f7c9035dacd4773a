#![forbid(unsafe_code)]

/// Number of hex digits in a line checksum.
pub const LINE_CHECKSUM_LEN: usize = 8;

/// Incremental 32-bit checksum.
pub trait Checksum {
    /// Clears accumulated state.
    fn reset(&mut self);
    /// Feeds bytes into the checksum.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed since the last reset.
    fn finalize(&self) -> u32;
}

/// CRC-32 backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Checksum of a record line prefix (`<Type>=<payload>#`), rendered as 8
/// lowercase hex digits.
pub fn line_checksum(prefix: &str) -> String {
    let mut hasher = Crc32Fast::default();
    hasher.update(prefix.as_bytes());
    hex::encode(hasher.finalize().to_be_bytes())
}
