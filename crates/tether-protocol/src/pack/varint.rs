//! Variable-length integers used by the pack format.
//!
//! Three encodings appear in a pack: the entry header (type plus size,
//! 4 bits then 7-bit little-endian groups), the delta header sizes (7-bit
//! little-endian groups), and the OFS_DELTA base distance (7-bit big-endian
//! groups with an implicit +1 per continuation byte).

/// Appends `value` as 7-bit little-endian groups.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads a 7-bit little-endian varint at `pos`, returning the value and the
/// number of bytes consumed. `None` on truncation or overflow.
pub fn decode_varint(buf: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut i = pos;
    loop {
        let byte = *buf.get(i)?;
        i += 1;
        if shift > 63 {
            return None;
        }
        let part = u64::from(byte & 0x7f);
        if shift > 0 && part >> (64 - shift) != 0 {
            return None;
        }
        value |= part << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Some((value, i - pos));
        }
    }
}

/// Appends a pack entry header: type in bits 4-6 of the first byte, size in
/// its low nibble and the following 7-bit groups.
pub fn encode_entry_header(type_code: u8, size: u64, out: &mut Vec<u8>) {
    let mut first = ((type_code & 0x07) << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    if rest > 0 {
        first |= 0x80;
    }
    out.push(first);
    while rest > 0 {
        let mut byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Reads a pack entry header, returning `(type_code, size, consumed)`.
pub fn decode_entry_header(buf: &[u8], pos: usize) -> Option<(u8, u64, usize)> {
    let first = *buf.get(pos)?;
    let type_code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4u32;
    let mut i = pos + 1;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *buf.get(i)?;
        i += 1;
        if shift > 63 {
            return None;
        }
        let part = u64::from(byte & 0x7f);
        if shift > 57 && part >> (64 - shift) != 0 {
            return None;
        }
        size |= part << shift;
        shift += 7;
    }
    Some((type_code, size, i - pos))
}

/// Appends an OFS_DELTA base distance.
pub fn encode_ofs_offset(distance: u64, out: &mut Vec<u8>) {
    let mut bytes = vec![(distance & 0x7f) as u8];
    let mut n = distance >> 7;
    while n > 0 {
        n -= 1;
        bytes.push(0x80 | (n & 0x7f) as u8);
        n >>= 7;
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}

/// Reads an OFS_DELTA base distance, returning it and the bytes consumed.
pub fn decode_ofs_offset(buf: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut byte = *buf.get(pos)?;
    let mut distance = u64::from(byte & 0x7f);
    let mut i = pos + 1;
    while byte & 0x80 != 0 {
        byte = *buf.get(i)?;
        i += 1;
        distance = distance
            .checked_add(1)?
            .checked_mul(128)?
            .checked_add(u64::from(byte & 0x7f))?;
    }
    Some((distance, i - pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_known_values() {
        let mut out = Vec::new();
        encode_varint(0, &mut out);
        encode_varint(127, &mut out);
        encode_varint(128, &mut out);
        encode_varint(300, &mut out);
        assert_eq!(out, [0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
        assert_eq!(decode_varint(&out, 4), Some((300, 2)));
    }

    #[test]
    fn test_varint_truncated() {
        assert_eq!(decode_varint(&[0x80, 0x80], 0), None);
        assert_eq!(decode_varint(&[], 0), None);
    }

    #[test]
    fn test_varint_overflow() {
        let mut buf = vec![0xff; 10];
        buf.push(0x01);
        assert_eq!(decode_varint(&buf, 0), None);
    }

    #[test]
    fn test_entry_header_blob() {
        // blob of 13 bytes: 0b0011_1101 is type 3, low size nibble 13
        let mut out = Vec::new();
        encode_entry_header(3, 13, &mut out);
        assert_eq!(out, [0x3d]);

        out.clear();
        encode_entry_header(1, 300, &mut out);
        assert_eq!(out, [0x9c, 0x12]);
        assert_eq!(decode_entry_header(&out, 0), Some((1, 300, 2)));
    }

    #[test]
    fn test_ofs_offset_known_values() {
        // 128 is the first distance that needs two bytes: (0 + 1) << 7 == 128
        let mut out = Vec::new();
        encode_ofs_offset(128, &mut out);
        assert_eq!(out, [0x80, 0x00]);
        assert_eq!(decode_ofs_offset(&out, 0), Some((128, 2)));

        out.clear();
        encode_ofs_offset(127, &mut out);
        assert_eq!(out, [0x7f]);

        assert_eq!(decode_ofs_offset(&[0x81, 0x7f], 0), Some((((1 + 1) << 7) + 0x7f, 2)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: varints decode to the encoded value and consume every encoded byte
        #[test]
        fn prop_varint_roundtrip(n in 0u64..=u64::from(u32::MAX)) {
            let mut out = Vec::new();
            encode_varint(n, &mut out);
            prop_assert_eq!(decode_varint(&out, 0), Some((n, out.len())));
        }

        /// Property: entry headers keep type and size
        #[test]
        fn prop_entry_header_roundtrip(type_code in 1u8..=7, size in any::<u32>()) {
            let mut out = Vec::new();
            encode_entry_header(type_code, u64::from(size), &mut out);
            prop_assert_eq!(decode_entry_header(&out, 0), Some((type_code, u64::from(size), out.len())));
        }

        /// Property: base distances survive the offset encoding
        #[test]
        fn prop_ofs_offset_roundtrip(n in any::<u32>()) {
            let mut out = Vec::new();
            encode_ofs_offset(u64::from(n), &mut out);
            prop_assert_eq!(decode_ofs_offset(&out, 0), Some((u64::from(n), out.len())));
        }
    }
}
