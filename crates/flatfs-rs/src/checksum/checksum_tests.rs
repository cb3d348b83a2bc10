use super::*;

#[test]
fn table_matches_reference_values() {
    // Spot checks against the published table for polynomial 0x04c11db7.
    assert_eq!(CRC32_TAB[0], 0x0000_0000);
    assert_eq!(CRC32_TAB[1], 0x04C1_1DB7);
    assert_eq!(CRC32_TAB[2], 0x0982_3B6E);
    assert_eq!(CRC32_TAB[16], 0x4C11_DB70);
    assert_eq!(CRC32_TAB[255], 0xB1F7_40B4);
}

#[test]
fn empty_buffer_returns_seed() {
    assert_eq!(crc32(&[], CRC32_INIT), CRC32_INIT);
    assert_eq!(crc32(&[], 0xDEAD_BEEF), 0xDEAD_BEEF);
}

#[test]
fn seeding_allows_incremental_computation() {
    let data = b"flat file system checksum engine";
    let (head, tail) = data.split_at(11);
    let whole = crc32(data, CRC32_INIT);
    let staged = crc32(tail, crc32(head, CRC32_INIT));
    assert_eq!(whole, staged);
}

#[test]
fn any_single_byte_flip_changes_the_checksum() {
    let mut buf = [0u8; 64];
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(37);
    }
    let baseline = crc32(&buf, CRC32_INIT);
    for i in 0..buf.len() {
        let mut corrupted = buf;
        corrupted[i] ^= 0x01;
        assert_ne!(crc32(&corrupted, CRC32_INIT), baseline, "flip at byte {i}");
    }
}

#[test]
fn block_checksum_ignores_the_header_fields() {
    let mut block = [0u8; crate::BLOCK_SIZE];
    block[100] = 0xAB;
    let baseline = block_checksum(&block);

    // The magic and checksum fields themselves are not covered.
    block[0] = 0xFF;
    block[7] = 0xFF;
    assert_eq!(block_checksum(&block), baseline);

    // The first covered byte is.
    block[CHECKSUM_SPAN_OFFSET] = 0x01;
    assert_ne!(block_checksum(&block), baseline);
}
