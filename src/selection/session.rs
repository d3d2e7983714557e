//! Signed pairing session tokens
//!
//! A token is `ps_<nonce>.<mac>`, where `mac` is HMAC-SHA256 over the nonce
//! and both item ids of the pairing it was issued for. Nothing is stored
//! server-side: a submission is checked by recomputing the MAC for the pair
//! being voted on. Fields are length-prefixed inside the MAC, so item ids
//! containing separators cannot be confused with one another.

use crate::types::PairingKey;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

const TOKEN_PREFIX: &str = "ps_";
const NONCE_HEX_LEN: usize = 32;
const MAC_HEX_LEN: usize = 64;
const HMAC_BLOCK: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of checking a submitted session id against a vote's pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Matches,
    /// Token format, but not signed for this pair (other pair or forged)
    Mismatch,
    /// Not in token format at all
    Opaque,
}

/// Issues and verifies session tokens with one server secret
pub struct SessionSigner {
    key: [u8; HMAC_BLOCK],
}

impl SessionSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        let mut key = [0u8; HMAC_BLOCK];
        if secret.len() > HMAC_BLOCK {
            key[..32].copy_from_slice(&Sha256::digest(secret));
        } else {
            key[..secret.len()].copy_from_slice(secret);
        }
        Self { key }
    }

    /// Fresh secret; tokens stop verifying once this signer is dropped
    pub fn random() -> Self {
        let secret: [u8; 32] = rand::thread_rng().gen();
        Self::new(secret)
    }

    pub fn issue(&self, pairing: &PairingKey) -> SessionToken {
        let nonce = Uuid::new_v4().simple().to_string();
        let mac = self.mac(&nonce, pairing);
        SessionToken(format!("{}{}.{}", TOKEN_PREFIX, nonce, hex::encode(mac)))
    }

    pub fn check(&self, raw: &str, pairing: &PairingKey) -> SessionCheck {
        let Some((nonce, mac)) = split_token(raw) else {
            return SessionCheck::Opaque;
        };

        let expected = self.mac(nonce, pairing);
        match hex::decode(mac) {
            Ok(given) if constant_time_eq(&given, &expected) => SessionCheck::Matches,
            _ => SessionCheck::Mismatch,
        }
    }

    fn mac(&self, nonce: &str, pairing: &PairingKey) -> [u8; 32] {
        let mut message = Vec::with_capacity(64 + nonce.len());
        for part in [nonce, pairing.low(), pairing.high()] {
            message.extend_from_slice(&(part.len() as u64).to_be_bytes());
            message.extend_from_slice(part.as_bytes());
        }
        hmac_sha256(&self.key, &message)
    }
}

/// `(nonce, mac)` when `raw` has the token shape
fn split_token(raw: &str) -> Option<(&str, &str)> {
    let (nonce, mac) = raw.strip_prefix(TOKEN_PREFIX)?.split_once('.')?;
    let is_hex = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit());

    (is_hex(nonce, NONCE_HEX_LEN) && is_hex(mac, MAC_HEX_LEN)).then_some((nonce, mac))
}

// RFC 2104 with a key already padded to the block size
fn hmac_sha256(key: &[u8; HMAC_BLOCK], message: &[u8]) -> [u8; 32] {
    let mut inner = Sha256::new();
    inner.update(key.map(|b| b ^ 0x36));
    inner.update(message);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(key.map(|b| b ^ 0x5c));
    outer.update(inner);
    outer.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
