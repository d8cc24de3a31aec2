//! Test fixtures for generating file contents.

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Leading bytes of a PDF document; enough for content sniffing.
pub const PDF_HEADER: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";

/// Generate deterministic test data based on a seed.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Compute SHA-256 hash of data as hex string.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Plain-text file contents of roughly `len` bytes.
#[allow(dead_code)]
pub fn text_content(seed: u64, len: usize) -> Bytes {
    let line = format!("Forelesningsnotat {seed}: termodynamikk og varmeoverføring.\n");
    let text: String = line.chars().cycle().take(len).collect();
    Bytes::from(text)
}

/// A PDF-looking file: real header followed by seeded filler.
#[allow(dead_code)]
pub fn pdf_content(seed: u64, len: usize) -> Bytes {
    let mut data = PDF_HEADER.to_vec();
    if len > data.len() {
        data.extend_from_slice(&text_content(seed, len - data.len()));
    }
    Bytes::from(data)
}

/// An ELF executable header padded to 64 bytes.
#[allow(dead_code)]
pub fn elf_content() -> Bytes {
    let mut data = vec![0x7F, b'E', b'L', b'F', 2, 1, 1, 0];
    data.resize(64, 0);
    Bytes::from(data)
}
