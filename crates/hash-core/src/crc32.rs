//! Incremental CRC-32 (IEEE) filter, used for optional SFV verification.

/// A fresh-per-file CRC-32 accumulator. Thin wrapper over `crc32fast` kept
/// separate so call sites read the same as the Tiger-tree builder
/// (`update` then `finalize`).
#[derive(Debug, Default)]
pub struct Crc32Filter {
    hasher: crc32fast::Hasher,
}

impl Crc32Filter {
    /// Start a new, empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finalize and return the CRC-32 value. Consumes the filter.
    #[must_use]
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        let mut crc = Crc32Filter::new();
        crc.update(b"123456789");
        assert_eq!(crc.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn chunking_does_not_change_result() {
        let data = b"the quick brown fox jumps over the lazy dog";

        let mut whole = Crc32Filter::new();
        whole.update(data);

        let mut chunked = Crc32Filter::new();
        for chunk in data.chunks(3) {
            chunked.update(chunk);
        }

        assert_eq!(whole.finalize(), chunked.finalize());
    }
}
