use rc4::consts::U96;
use rc4::{Key, KeyInit, Rc4, StreamCipher};

use crate::{AppError, AppResult};

/// Length of the negotiated session key: 32-byte shared secret followed by
/// the two 32-byte nonces.
pub const SESSION_KEY_LEN: usize = 96;

/// Symmetric payload cipher installed on a session once the key exchange
/// completes. Stream state is mutated by every call, so the codec borrows the
/// instance mutably for the duration of a pack or unpack.
pub trait Crypto: Send {
    fn encrypt(&mut self, data: &[u8]) -> AppResult<Vec<u8>>;
    fn decrypt(&mut self, data: &[u8]) -> AppResult<Vec<u8>>;
}

type SessionCipher = Rc4<U96>;

/// RC4 keyed with the negotiated session key.
///
/// RC4 keystream state is direction specific: the encrypt and decrypt
/// directions each hold their own cipher instance and must never be swapped
/// or shared.
pub struct Rc4Crypto {
    cipher_en: SessionCipher,
    cipher_de: SessionCipher,
}

impl Rc4Crypto {
    pub fn new(key: &[u8]) -> AppResult<Self> {
        if key.len() != SESSION_KEY_LEN {
            return Err(AppError::Handshake(format!(
                "session key must be {} bytes, got {}",
                SESSION_KEY_LEN,
                key.len()
            )));
        }
        let key = Key::<U96>::from_slice(key);
        Ok(Self {
            cipher_en: SessionCipher::new(key),
            cipher_de: SessionCipher::new(key),
        })
    }
}

impl Crypto for Rc4Crypto {
    fn encrypt(&mut self, data: &[u8]) -> AppResult<Vec<u8>> {
        let mut out = data.to_vec();
        self.cipher_en.apply_keystream(&mut out);
        Ok(out)
    }

    fn decrypt(&mut self, data: &[u8]) -> AppResult<Vec<u8>> {
        let mut out = data.to_vec();
        self.cipher_de.apply_keystream(&mut out);
        Ok(out)
    }
}
