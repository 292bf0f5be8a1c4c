//! OSTA compressed Unicode d-strings (ECMA-167 1/7.2.12).
//!
//! Everything this tool records fits the 8-bit compression: byte 0 carries
//! the compression id 8, the characters follow as single bytes.
//! see CompressUnicode http://www.osta.org/specs/pdf/udf260.pdf#page=117

/// Compression id for 8-bit OSTA compressed Unicode.
pub const COMPRESSION_8BIT: u8 = 8;

/// Pack a d-string into a fixed field whose last byte stores the used
/// length (characters + the compression id byte). An empty source leaves
/// the whole field zero.
///
/// Used by the fixed d-string fields of the PVD, IUVD, LVD and FSD.
pub fn pack_dstring(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let len = bytes.len().min(buf.len() - 2);
    if len == 0 {
        return;
    }
    buf[0] = COMPRESSION_8BIT;
    buf[1..1 + len].copy_from_slice(&bytes[..len]);
    let last = buf.len() - 1;
    buf[last] = (len + 1) as u8;
}

/// Pack a d-string with no trailing length byte; the field length itself
/// is recorded elsewhere (File Identifier Descriptors record it in
/// LengthOfFileIdentifier).
pub fn pack_dstring_ne(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let len = bytes.len().min(buf.len() - 1);
    if len == 0 {
        return;
    }
    buf[0] = COMPRESSION_8BIT;
    buf[1..1 + len].copy_from_slice(&bytes[..len]);
}

/// Byte length of a file identifier as recorded in a FID: the compression
/// id byte plus one byte per character.
pub fn identifier_len(name: &str) -> usize {
    name.len() + 1
}

/// Decode an 8-bit compressed d-string (stops at the first NUL).
pub fn decode(bytes: &[u8]) -> String {
    if bytes.is_empty() || bytes[0] != COMPRESSION_8BIT {
        return String::new();
    }
    bytes[1..]
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_with_length() {
        let mut buf = [0xAAu8; 32];
        pack_dstring(&mut buf, "HELLO");
        assert_eq!(buf[0], 8);
        assert_eq!(&buf[1..6], b"HELLO");
        assert!(buf[6..31].iter().all(|&b| b == 0));
        assert_eq!(buf[31], 6);
        assert_eq!(decode(&buf), "HELLO");
    }

    #[test]
    fn test_pack_empty_is_all_zero() {
        let mut buf = [0xAAu8; 32];
        pack_dstring(&mut buf, "");
        assert!(buf.iter().all(|&b| b == 0));
        let mut buf = [0xAAu8; 32];
        pack_dstring_ne(&mut buf, "");
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pack_truncates() {
        let mut buf = [0u8; 8];
        // 6 characters fit before the length byte
        pack_dstring(&mut buf, "ABCDEFGHIJ");
        assert_eq!(&buf[1..7], b"ABCDEF");
        assert_eq!(buf[7], 7);
        // 7 characters fit when there is no length byte
        let mut buf = [0u8; 8];
        pack_dstring_ne(&mut buf, "ABCDEFGHIJ");
        assert_eq!(&buf[1..8], b"ABCDEFG");
    }

    #[test]
    fn test_identifier_len() {
        assert_eq!(identifier_len("A"), 2);
        assert_eq!(identifier_len("AUDIO_TS"), 9);
    }
}
