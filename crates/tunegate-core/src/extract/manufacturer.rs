//! Best-effort ECU manufacturer labelling from embedded ASCII signatures.
//! The label is metadata only; it never gates extraction.

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"DENSO", "Denso"),
    (b"KEIHIN", "Keihin"),
    (b"MITSUBISHI", "Mitsubishi Electric"),
    (b"MELCO", "Mitsubishi Electric"),
    (b"BOSCH", "Bosch"),
    (b"MARELLI", "Magneti Marelli"),
    (b"SIEMENS", "Continental"),
    (b"CONTINENTAL", "Continental"),
    (b"HITACHI", "Hitachi Astemo"),
];

/// Label of the signature that occurs earliest in `bytes`, if any.
pub fn identify(bytes: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .filter_map(|(sig, label)| find(bytes, sig).map(|pos| (pos, *label)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, label)| label)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_case_insensitively() {
        assert_eq!(identify(b"\x00\x01Keihin Corp\x00"), Some("Keihin"));
    }

    #[test]
    fn earliest_signature_wins() {
        assert_eq!(identify(b"....BOSCH....DENSO"), Some("Bosch"));
    }

    #[test]
    fn unknown_bytes_have_no_label() {
        assert_eq!(identify(&[0u8; 512]), None);
        assert_eq!(identify(b""), None);
    }
}
