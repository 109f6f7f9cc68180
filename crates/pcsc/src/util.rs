//! Utility functions for PC/SC operations

/// Match an ATR against a pattern with an optional mask
///
/// If a mask is provided, only the bits set in the mask are compared.
pub fn match_atr(atr: &[u8], pattern: &[u8], mask: Option<&[u8]>) -> bool {
    // If pattern is longer than ATR, it can't match
    if pattern.len() > atr.len() {
        return false;
    }

    match mask {
        Some(mask) => {
            // Mask must be at least as long as pattern
            if mask.len() < pattern.len() {
                return false;
            }
            pattern
                .iter()
                .zip(mask)
                .zip(atr)
                .all(|((p, m), a)| (a & m) == (p & m))
        }
        None => atr.starts_with(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const ESTEID_ATR: &[u8] = &hex!("3bdb960080b1fe451f830012233f536549440f9000f1");

    #[test]
    fn test_exact_prefix() {
        assert!(match_atr(ESTEID_ATR, &hex!("3bdb9600"), None));
        assert!(!match_atr(ESTEID_ATR, &hex!("3bfe"), None));
    }

    #[test]
    fn test_masked_match() {
        let pattern = hex!("3b00960080");
        let mask = hex!("ff00ffffff");
        assert!(match_atr(ESTEID_ATR, &pattern, Some(&mask)));
        // Short mask never matches
        assert!(!match_atr(ESTEID_ATR, &pattern, Some(&hex!("ff"))));
    }

    #[test]
    fn test_pattern_longer_than_atr() {
        assert!(!match_atr(&hex!("3b00"), &hex!("3b0000"), None));
    }
}
