const HEX_BYTES_LOWER: &[u8; 16] = b"0123456789abcdef";

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut into = String::with_capacity(bytes.len() * 2);

    for b in bytes {
        into.push(HEX_BYTES_LOWER[(b >> 4) as usize] as char);
        into.push(HEX_BYTES_LOWER[(b & 0xF) as usize] as char);
    }
    into
}

fn decode_nibble(nibble: u8) -> Option<u8> {
    match nibble {
        b'0'..=b'9' => Some(nibble - b'0'),
        b'a'..=b'f' => Some(nibble - b'a' + 10),
        b'A'..=b'F' => Some(nibble - b'A' + 10),
        _ => None,
    }
}

/// Decode a hex string, allowing an optional `0x` prefix and `:` separators
/// as printed by `apksigner` and `keytool`
pub fn bytes_from_hex(ashex: &str) -> Option<Vec<u8>> {
    let trimmed = ashex
        .strip_prefix("0x")
        .or_else(|| ashex.strip_prefix("0X"))
        .unwrap_or(ashex);

    let digits = trimmed
        .bytes()
        .filter(|b| *b != b':')
        .collect::<Vec<u8>>();

    if digits.len() % 2 != 0 {
        return None;
    }

    digits
        .chunks(2)
        .map(|pair| Some((decode_nibble(pair[0])? << 4) | decode_nibble(pair[1])?))
        .collect()
}
