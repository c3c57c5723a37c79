use rand::Rng;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate an opaque bearer string of the given length.
///
/// Access and refresh tokens are server-side records, not self-describing
/// tokens, so all that matters here is entropy and URL-safety.
pub fn make_bearer(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_bearer_length() {
        assert_eq!(make_bearer(24).len(), 24);
        assert_eq!(make_bearer(32).len(), 32);
    }

    #[test]
    fn test_make_bearer_is_random() {
        // Two 32-char draws colliding would mean a broken RNG.
        assert_ne!(make_bearer(32), make_bearer(32));
    }

    #[test]
    fn test_make_bearer_is_alphanumeric() {
        assert!(make_bearer(64).chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
