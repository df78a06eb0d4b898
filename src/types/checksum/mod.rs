#![forbid(unsafe_code)]

/// CRC32 of a stored frame, bound to the offset it was written at so that a
/// frame copied to the wrong place fails verification.
pub fn frame_crc32(offset: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&offset.to_be_bytes());
    hasher.update(&(payload.len() as u64).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
