//! HMAC-SHA256 payload signatures.
//!
//! Both sides compute the digest over the uncompressed body and transmit it as lowercase hex in
//! the [`SIGNATURE_HEADER`](crate::constants::SIGNATURE_HEADER).

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies payloads with a shared secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Creates a signer for the given key.
    ///
    /// Returns `None` for an empty key, which disables signing.
    pub fn new(key: impl AsRef<[u8]>) -> Option<Self> {
        let key = key.as_ref();
        if key.is_empty() {
            return None;
        }

        let mac = <HmacSha256 as Mac>::new_from_slice(key).ok()?;
        Some(Self { mac })
    }

    /// Returns the lowercase hex digest of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks `signature` against the digest of `data` in constant time.
    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };

        let mut mac = self.mac.clone();
        mac.update(data);
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_disables_signing() {
        assert!(Signer::new("").is_none());
    }

    #[test]
    fn test_sign_known_digest() {
        // RFC 4231, test case 2.
        let signer = Signer::new("Jefe").unwrap();
        assert_eq!(
            signer.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let signer = Signer::new("secret").unwrap();
        let signature = signer.sign(b"payload");

        assert!(signer.verify(b"payload", &signature));
        assert!(signer.verify(b"payload", &signature.to_uppercase()));
        assert!(!signer.verify(b"tampered", &signature));
        assert!(!signer.verify(b"payload", "not hex"));
        assert!(!Signer::new("other").unwrap().verify(b"payload", &signature));
    }
}
