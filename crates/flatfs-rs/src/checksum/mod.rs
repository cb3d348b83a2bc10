//! CRC32 engine used to stamp and validate every persisted block.

#[cfg(test)]
mod checksum_tests;

/// Polynomial shared by the on-disk format and the offline formatter.
const CRC32_POLY: u32 = 0x04C1_1DB7;

/// Seed for a fresh checksum computation.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Offset of the first checksummed byte in a block: everything after the
/// magic and checksum fields is covered.
pub const CHECKSUM_SPAN_OFFSET: usize = 8;

static CRC32_TAB: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// `crc32` folds `buf` into a running checksum, MSB first, one byte at a
/// time. Seed with [`CRC32_INIT`] for a fresh computation, or with a
/// previous result to continue one.
#[must_use]
pub fn crc32(buf: &[u8], init: u32) -> u32 {
    let mut crc = init;
    for byte in buf {
        crc = (crc << 8) ^ CRC32_TAB[(((crc >> 24) as u8) ^ byte) as usize];
    }
    crc
}

/// `block_checksum` computes the checksum stored in a block header: the
/// bytes following the magic and checksum fields, seeded with
/// [`CRC32_INIT`].
#[must_use]
pub fn block_checksum(block: &[u8]) -> u32 {
    crc32(&block[CHECKSUM_SPAN_OFFSET..], CRC32_INIT)
}
