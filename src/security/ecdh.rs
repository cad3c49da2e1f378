use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{AppError, AppResult};

/// Curve25519 public key and handshake nonce are both 32 bytes.
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 32;

/// Key-exchange request payload, hex-encoded JSON on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// Initiator public key.
    pub public_key: String,
    /// Initiator nonce.
    pub r: String,
}

/// Key-exchange response payload, same shape as the request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExchangeResponse {
    /// Responder public key.
    pub public_key: String,
    /// Responder nonce.
    pub r: String,
}

/// Generates a fresh Curve25519 keypair.
pub fn generate_keys() -> (PublicKey, StaticSecret) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (public, secret)
}

/// Generates a 32-byte handshake nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Computes the shared secret from our private key and the peer public key.
pub fn shared_key(private: &StaticSecret, peer_public: &[u8]) -> AppResult<[u8; KEY_LEN]> {
    let peer: [u8; KEY_LEN] = peer_public
        .try_into()
        .map_err(|_| AppError::Handshake(format!("peer public key must be {} bytes", KEY_LEN)))?;
    Ok(*private.diffie_hellman(&PublicKey::from(peer)).as_bytes())
}

/// Derives the session key: shared secret, then the responder nonce, then the
/// initiator nonce. Both sides concatenate in this order, so both arrive at
/// the same 96 bytes.
pub fn build_key(shared: &[u8], rs: &[u8], rc: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(shared.len() + rs.len() + rc.len());
    key.extend_from_slice(shared);
    key.extend_from_slice(rs);
    key.extend_from_slice(rc);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SESSION_KEY_LEN;

    #[test]
    fn both_sides_derive_the_same_shared_secret() {
        let (pub_c, priv_c) = generate_keys();
        let (pub_s, priv_s) = generate_keys();

        let client_side = shared_key(&priv_c, pub_s.as_bytes()).unwrap();
        let server_side = shared_key(&priv_s, pub_c.as_bytes()).unwrap();
        assert_eq!(client_side, server_side);
    }

    #[test]
    fn session_key_is_96_bytes_and_order_sensitive() {
        let shared = [1u8; KEY_LEN];
        let rs = [2u8; NONCE_LEN];
        let rc = [3u8; NONCE_LEN];

        let key = build_key(&shared, &rs, &rc);
        assert_eq!(key.len(), SESSION_KEY_LEN);
        assert_ne!(key, build_key(&shared, &rc, &rs));
    }

    #[test]
    fn malformed_peer_key_is_rejected() {
        let (_, secret) = generate_keys();
        assert!(shared_key(&secret, &[0u8; 16]).is_err());
    }
}
