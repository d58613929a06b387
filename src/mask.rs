//! Payload masking as defined in [RFC 6455 Section 5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3).
//!
//! Masking XORs every payload byte with `key[i % 4]`. Applying the same key
//! twice restores the original bytes, so one routine serves both masking and
//! unmasking.

/// Mask or unmask a buffer in place.
///
/// Works on 4-byte words where possible and falls back to byte-wise XOR for
/// the unaligned tail.
pub(crate) fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let key32 = u32::from_ne_bytes(key);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        let v = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ key32;
        word.copy_from_slice(&v.to_ne_bytes());
    }
    for (i, byte) in words.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Mask or unmask a buffer that starts `offset` bytes into the frame payload.
///
/// Chunked sends mask one scratch-sized slice at a time; the key phase must
/// carry across chunk boundaries so the peer can unmask with a single key.
pub(crate) fn apply_mask_offset(buf: &mut [u8], key: [u8; 4], offset: usize) {
    let mut shifted = key;
    shifted.rotate_left(offset & 3);
    apply_mask(buf, shifted);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_mask(buf: &mut [u8], key: [u8; 4], offset: usize) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= key[(offset + i) & 3];
        }
    }

    #[test]
    fn mask_is_self_inverse() {
        let key = [0xAA, 0xBB, 0xCC, 0xDD];
        let original: Vec<u8> = (0..133).map(|i| (i * 7) as u8).collect();

        let mut data = original.clone();
        apply_mask(&mut data, key);
        assert_ne!(data, original);

        apply_mask(&mut data, key);
        assert_eq!(data, original);
    }

    #[test]
    fn mask_matches_reference_for_all_lengths() {
        let key = [0x12, 0x34, 0x56, 0x78];
        for len in 0..=64 {
            let data: Vec<u8> = (0..len).map(|i| (i * 31) as u8).collect();

            let mut fast = data.clone();
            apply_mask(&mut fast, key);

            let mut reference = data.clone();
            reference_mask(&mut reference, key, 0);

            assert_eq!(fast, reference, "mismatch at len={len}");
        }
    }

    #[test]
    fn zero_key_is_identity() {
        let mut data = b"unchanged".to_vec();
        apply_mask(&mut data, [0; 4]);
        assert_eq!(&data, b"unchanged");
    }

    #[test]
    fn offset_mask_carries_key_phase_across_chunks() {
        let key = [0x6D, 0xB6, 0xB2, 0x80];
        let payload: Vec<u8> = (0..97).map(|i| (i * 13) as u8).collect();

        let mut whole = payload.clone();
        apply_mask(&mut whole, key);

        // Mask the same payload in uneven chunks.
        for split in [1, 3, 4, 7, 50, 96] {
            let (head, tail) = payload.split_at(split);
            let mut chunked = Vec::new();
            let mut first = head.to_vec();
            apply_mask_offset(&mut first, key, 0);
            chunked.extend_from_slice(&first);
            let mut second = tail.to_vec();
            apply_mask_offset(&mut second, key, split);
            chunked.extend_from_slice(&second);

            assert_eq!(chunked, whole, "mismatch at split={split}");
        }
    }

    #[test]
    fn offset_mask_matches_reference() {
        let key = [0x01, 0x23, 0x45, 0x67];
        for offset in 0..8 {
            let data: Vec<u8> = (0..21).map(|i| (i * 3) as u8).collect();

            let mut fast = data.clone();
            apply_mask_offset(&mut fast, key, offset);

            let mut reference = data.clone();
            reference_mask(&mut reference, key, offset);

            assert_eq!(fast, reference, "mismatch at offset={offset}");
        }
    }
}
