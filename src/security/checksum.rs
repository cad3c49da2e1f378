use hmac::{Hmac, Mac};
use md5::Md5;

/// Frame-level integrity tag, 16 bytes.
pub const CHECKSUM_LEN: usize = 16;

type HmacMd5 = Hmac<Md5>;

/// Keyed integrity tag over a whole frame with the checksum slot zeroed.
///
/// Before the key exchange completes the session has no key and the empty
/// byte string is used, which still detects accidental corruption; after the
/// exchange the tag is authenticated with the negotiated session key.
pub fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut mac = HmacMd5::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}
