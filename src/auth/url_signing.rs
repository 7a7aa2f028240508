//! HMAC signatures for local byte-range tickets.
//!
//! Blocks served by `/file-bytes` carry an expiry and a signature over the
//! file path and byte range, so a client can fetch exactly the ranges its
//! ticket granted and nothing else.

use crate::storage::ByteRange;
use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const SECRET_LEN: usize = 32;

/// Expiry and signature attached to one signed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRange {
    /// Unix seconds after which the signature is refused.
    pub expires: u64,
    pub signature: String,
}

/// Signs and verifies `/file-bytes` requests with HMAC-SHA256.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    expiry: Duration,
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, expiry: Duration) -> Self {
        Self {
            secret: secret.into(),
            expiry,
        }
    }

    /// Signer with a fresh random secret. Tickets it signs stop verifying
    /// once the process restarts.
    pub fn random(expiry: Duration) -> Self {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::rng().fill_bytes(&mut secret);
        Self::new(secret, expiry)
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn sign(&self, path: &str, range: &ByteRange) -> Result<SignedRange> {
        let expires = unix_now() + self.expiry.as_secs();
        let mac = self.mac(path, range, expires)?;
        Ok(SignedRange {
            expires,
            signature: URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()),
        })
    }

    /// Check that `signature` was issued by this signer for exactly this
    /// path and range, and has not expired.
    pub fn verify(
        &self,
        path: &str,
        range: &ByteRange,
        expires: u64,
        signature: &str,
    ) -> Result<()> {
        let now = unix_now();
        if now > expires {
            tracing::debug!("file-bytes signature expired: now={}, expires={}", now, expires);
            return Err(Error::InvalidAuthentication);
        }

        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| {
            tracing::debug!("undecodable file-bytes signature");
            Error::InvalidAuthentication
        })?;

        self.mac(path, range, expires)?
            .verify_slice(&signature)
            .map_err(|_| {
                tracing::debug!("file-bytes signature mismatch for {}", path);
                Error::InvalidAuthentication
            })
    }

    fn mac(&self, path: &str, range: &ByteRange, expires: u64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(format!("HMAC key rejected: {}", e)))?;
        mac.update(format!("{}\n{}\n{}", path, range.range_header(), expires).as_bytes());
        Ok(mac)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/data/studyA/sample1.vcf.gz";

    fn signer() -> UrlSigner {
        UrlSigner::new(b"test-secret".to_vec(), Duration::from_secs(3600))
    }

    #[test]
    fn test_sign_and_verify() {
        let range = ByteRange::new(0, 99);
        let signed = signer().sign(PATH, &range).unwrap();
        assert!(signer().verify(PATH, &range, signed.expires, &signed.signature).is_ok());
    }

    #[test]
    fn test_expired_signature() {
        let range = ByteRange::new(0, 99);
        let signed = signer().sign(PATH, &range).unwrap();
        let expires = unix_now() - 1;
        assert!(matches!(
            signer().verify(PATH, &range, expires, &signed.signature),
            Err(Error::InvalidAuthentication)
        ));
    }

    #[test]
    fn test_tampered_range_or_path() {
        let range = ByteRange::new(0, 99);
        let signed = signer().sign(PATH, &range).unwrap();

        let wider = ByteRange::new(0, 999);
        assert!(signer().verify(PATH, &wider, signed.expires, &signed.signature).is_err());
        assert!(signer()
            .verify("/data/restricted.vcf.gz", &range, signed.expires, &signed.signature)
            .is_err());
        assert!(signer().verify(PATH, &range, signed.expires + 60, &signed.signature).is_err());
    }

    #[test]
    fn test_invalid_signature() {
        let range = ByteRange::new(0, 99);
        let signed = signer().sign(PATH, &range).unwrap();
        assert!(signer().verify(PATH, &range, signed.expires, "wrong-sig").is_err());
        assert!(signer().verify(PATH, &range, signed.expires, "!!!").is_err());
    }

    #[test]
    fn test_random_signers_do_not_share_secrets() {
        let range = ByteRange::new(0, 99);
        let first = UrlSigner::random(Duration::from_secs(60));
        let second = UrlSigner::random(Duration::from_secs(60));
        let signed = first.sign(PATH, &range).unwrap();
        assert!(second.verify(PATH, &range, signed.expires, &signed.signature).is_err());
    }
}
