//! Shared-secret generation and the control-channel credential check.

use rand::Rng;

/// Secret length in bytes (produces 32 hex characters).
const SECRET_BYTES: usize = 16;

/// Generates a CSPRNG secret as a 32-character lowercase hex string.
///
/// The value travels in a `Sec-WebSocket-Protocol` header and a URL query,
/// so it must stay within the HTTP token charset.
pub fn generate_token() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Checks a credential offered by a connecting peer.
///
/// Nothing matches until a secret has been generated, and a missing
/// credential never matches. Uses constant-time comparison.
pub fn credential_matches(offered: Option<&str>, expected: Option<&str>) -> bool {
    let (Some(offered), Some(expected)) = (offered, expected) else {
        return false;
    };
    if offered.len() != expected.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in offered.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn matching_credential() {
        let token = generate_token();
        assert!(credential_matches(Some(&token), Some(&token)));
    }

    #[test]
    fn mismatched_credentials() {
        let token = generate_token();
        assert!(!credential_matches(Some(&generate_token()), Some(&token)));
        assert!(!credential_matches(Some("short"), Some(&token)));
        assert!(!credential_matches(Some(""), Some(&token)));
    }

    #[test]
    fn missing_credential_or_secret_never_matches() {
        let token = generate_token();
        assert!(!credential_matches(None, Some(&token)));
        assert!(!credential_matches(Some(&token), None));
        assert!(!credential_matches(None, None));
    }
}
