#![forbid(unsafe_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_ENTROPY_BYTES: usize = 24;

/// Source of unguessable opaque strings for grant tokens and link nonces.
pub trait TokenSource: Send {
    fn mint(&mut self, prefix: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn mint(&mut self, prefix: &str) -> String {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        format!("{prefix}_{}", URL_SAFE_NO_PAD.encode(bytes))
    }
}

/// Predictable tokens for tests and replays.
#[derive(Debug, Default, Clone)]
pub struct SequenceTokenSource {
    next: u64,
}

impl SequenceTokenSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for SequenceTokenSource {
    fn mint(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{prefix}_{:016x}", self.next)
    }
}

/// Hex SHA-256 of a token. Arbitration compares digests, never raw tokens.
pub fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
