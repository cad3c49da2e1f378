//! Cryptographic adapters for the session layer: the RC4 payload cipher, the
//! Curve25519 key agreement, the keyed frame checksum, and the in-band key
//! exchange protocol built on them.

pub mod checksum;
pub mod crypto;
pub mod ecdh;
pub mod key_exchange;

pub use checksum::{hmac_md5, CHECKSUM_LEN};
pub use crypto::{Crypto, Rc4Crypto, SESSION_KEY_LEN};
pub use ecdh::{ExchangeRequest, ExchangeResponse};
pub use key_exchange::{
    exchange_key_parse_response, exchange_key_request, exchange_key_response, HandshakeState,
};
