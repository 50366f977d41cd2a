//! Ed25519 signature verification
//!
//! Two verification modes exist in the wild and both must keep working:
//! the detached mode used by signed envelopes, and the `crypto_sign_open`
//! mode used by the older header-based signatures. New signatures are only
//! ever written detached; the open form is kept to verify history.

use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::article::Article;
use crate::validation::{decode_pubkey, decode_signature};
use crate::Result;

/// Verify a detached Ed25519 signature over a SHA-512 digest
///
/// The message verified is the 64-byte digest itself; the caller has already
/// hashed the signed region.
#[must_use]
pub fn verify_detached(hash: &[u8; 64], sig: &[u8; 64], pubkey: &[u8; 32]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let signature = Signature::from_bytes(sig);
    key.verify_strict(hash, &signature).is_ok()
}

/// Verify a `crypto_sign_open` style signed blob
///
/// The blob is `signature ‖ message`: the first 64 bytes are the signature,
/// the remainder is the signed plaintext (here, always a SHA-512 digest).
#[must_use]
pub fn verify_open(signed: &[u8], pubkey: &[u8; 32]) -> bool {
    if signed.len() < 64 {
        return false;
    }
    let (sig, message) = signed.split_at(64);
    let sig: [u8; 64] = match sig.try_into() {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let Ok(key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig);
    key.verify_strict(message, &signature).is_ok()
}

/// Canonical byte form of a header-signed region
///
/// Every lone `\n` becomes `\r\n`, then the final two bytes are dropped.
/// This rule exists solely so old header signatures keep verifying; it is
/// not a general newline canonicalizer and must not be used anywhere else.
#[must_use]
pub fn canonical_signed_region(signed: &str) -> Vec<u8> {
    let bytes = signed.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 16);
    let mut prev = 0u8;
    for &b in bytes {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out.truncate(out.len().saturating_sub(2));
    out
}

/// Check the header-based signature of an article, if it carries one
///
/// An article with no key, no signature, or no retained signed region passes
/// vacuously. Otherwise the signed region is canonicalized, hashed with
/// SHA-512, and checked in the open mode. Malformed key material is a
/// validation error rather than a quiet failure.
pub fn verify_header_signature(article: &Article) -> Result<bool> {
    if article.pubkey.is_empty() || article.signature.is_empty() || article.signed_body.is_empty() {
        return Ok(true);
    }
    let pubkey = decode_pubkey(&article.pubkey)?;
    let sig = decode_signature(&article.signature)?;

    let canonical = canonical_signed_region(&article.signed_body);
    let hash: [u8; 64] = Sha512::digest(&canonical).into();

    let mut signed = Vec::with_capacity(64 + hash.len());
    signed.extend_from_slice(&sig);
    signed.extend_from_slice(&hash);

    if verify_open(&signed, &pubkey) {
        debug!("verified header signature on {}", article.message_id);
        Ok(true)
    } else {
        warn!("invalid header signature on {}", article.message_id);
        Ok(false)
    }
}

/// SHA-512 of a byte slice as a fixed array
#[must_use]
pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}
