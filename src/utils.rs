use std::env;

use tracing::warn;

use crate::codec::{ArrayPolicy, ByteOrder};

/// The smallest array size EPICS allows for `EPICS_CA_MAX_ARRAY_BYTES`
pub const DEFAULT_MAX_ARRAY_BYTES: usize = 16384;

/// Get the largest array payload, either from environment or default 16384
pub fn get_default_max_array_bytes() -> usize {
    env::var("EPICS_CA_MAX_ARRAY_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_ARRAY_BYTES)
        .max(DEFAULT_MAX_ARRAY_BYTES)
}

/// Get the representation for decoded numeric arrays, either from environment or boxed
pub fn get_default_array_policy() -> ArrayPolicy {
    match env::var("EPICS_DBR_ARRAY_POLICY") {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!("Ignoring unrecognised EPICS_DBR_ARRAY_POLICY '{v}'");
            ArrayPolicy::default()
        }),
        Err(_) => ArrayPolicy::default(),
    }
}

/// Get the byte order of raw records, either from environment or native
pub fn get_default_byte_order() -> ByteOrder {
    match env::var("EPICS_DBR_BYTE_ORDER") {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!("Ignoring unrecognised EPICS_DBR_BYTE_ORDER '{v}'");
            ByteOrder::default()
        }),
        Err(_) => ByteOrder::default(),
    }
}

/// Copy as much of a string as fits in `max_length` bytes, never splitting a character
///
/// This is `strncpy` into a fixed slot, except that a multi-byte UTF-8 character that
/// would straddle the end of the slot is dropped whole.
pub(crate) fn string_to_fixed_length_bytes(value: &str, max_length: usize) -> Vec<u8> {
    let end = value
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= max_length)
        .last()
        .unwrap_or(0);
    value.as_bytes()[..end].to_vec()
}

/// Read a NUL-padded text slot, stopping at the first NUL or the end of the slot
pub(crate) fn fixed_length_bytes_to_string(slot: &[u8]) -> String {
    let strlen = slot.iter().position(|&c| c == 0x00).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..strlen]).into_owned()
}

/// Interpret an array of CHAR as a zero-terminated string
pub fn text_from_chars(chars: &[u8]) -> String {
    fixed_length_bytes_to_string(chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_length_strings() {
        assert_eq!(string_to_fixed_length_bytes("abc", 40), b"abc");
        assert_eq!(string_to_fixed_length_bytes(&"x".repeat(41), 40).len(), 40);
        // Never split a multi-byte character
        assert_eq!(string_to_fixed_length_bytes("aé", 2), b"a");
        assert_eq!(fixed_length_bytes_to_string(b"units\0\0\0"), "units");
        assert_eq!(fixed_length_bytes_to_string(b"full"), "full");
    }
}
