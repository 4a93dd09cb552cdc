//! Request authentication: HMAC-SHA256 over the nonce with monotonic-nonce
//! replay protection.
//!
//! The nonce is the ASCII decimal the client sent, typically a millisecond
//! counter; the signature is 64 hex chars of HMAC-SHA256 over that exact
//! string under the shared secret. A sliding floor of [`REPLAY_WINDOW`] units
//! below the last accepted nonce admits mildly out-of-order arrivals while
//! rejecting true replays. The last accepted nonce lives in a persistent
//! single-slot store and is only advanced after the signature checks out.
//!
//! `verify` answers with a bare bool. Callers must not learn, and therefore
//! cannot leak, which step failed; details go to the debug log only.

use bolt_traits::NonceStore;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Units below the last accepted nonce that are still refused.
pub const REPLAY_WINDOW: u32 = 5;

pub struct RequestAuth<S> {
    store: S,
    secret: Vec<u8>,
    skip_verification: bool,
}

impl<S: NonceStore> RequestAuth<S> {
    pub fn new(store: S, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            secret: secret.into(),
            skip_verification: false,
        }
    }

    /// Accept every well-formed request without checking signatures.
    /// Test builds only; gated by explicit configuration.
    pub fn skipping_verification(store: S) -> Self {
        Self {
            store,
            secret: Vec::new(),
            skip_verification: true,
        }
    }

    /// Wipe the slot back to zero (boot-time reset flag).
    pub fn reset(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.store.store(0)
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Verify one request. True only when the nonce parses, clears the replay
    /// floor, the signature matches, and the new nonce was persisted.
    pub fn verify(&mut self, nonce_str: &str, signature_hex: &str) -> bool {
        if self.skip_verification {
            return true;
        }

        let nonce: u32 = match nonce_str.parse() {
            Ok(n) => n,
            Err(_) => {
                debug!("auth reject: nonce not a decimal u32");
                return false;
            }
        };

        let last = match self.store.load() {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "auth reject: nonce slot unreadable");
                return false;
            }
        };

        // Sliding floor: everything at or below max(window, last) - window is
        // a replay. For a fresh slot the floor is zero and only nonce 0 is
        // refused.
        let floor = last.max(REPLAY_WINDOW) - REPLAY_WINDOW;
        if nonce <= floor {
            debug!(nonce, last, "auth reject: nonce below replay floor");
            return false;
        }

        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(m) => m,
            Err(_) => return false,
        };
        mac.update(nonce_str.as_bytes());
        let expected: [u8; 32] = mac.finalize().into_bytes().into();

        let received = match decode_hex_32(signature_hex) {
            Some(bytes) => bytes,
            None => {
                debug!("auth reject: malformed signature hex");
                return false;
            }
        };

        if !constant_time_eq(&expected, &received) {
            debug!(nonce, "auth reject: signature mismatch");
            return false;
        }

        // Replay protection must not silently degrade: an unpersisted nonce
        // rejects the request even though the signature was good.
        match self.store.store(nonce) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "auth reject: nonce persist failed");
                false
            }
        }
    }
}

/// Constant-time 32-byte compare. Accumulates XOR differences with OR and
/// never short-circuits, so runtime is independent of where the first
/// mismatch sits.
pub fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn decode_hex_32(s: &str) -> Option<[u8; 32]> {
    let bytes = s.as_bytes();
    if bytes.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let hi = hex_val(pair[0])?;
        let lo = hex_val(pair[1])?;
        out[i] = (hi << 4) | lo;
    }
    Some(out)
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Produce the lowercase hex signature a client would send for `nonce_str`.
/// Shared by tests and client tooling.
pub fn sign_nonce(secret: &[u8], nonce_str: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    // HMAC accepts any key length; the error arm is unreachable.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(nonce_str.as_bytes());
    let out = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(64);
    for b in out {
        hex.push(HEX[(b >> 4) as usize] as char);
        hex.push(HEX[(b & 0x0f) as usize] as char);
    }
    hex
}
