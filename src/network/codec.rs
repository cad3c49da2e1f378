use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::network::compress::Compressor;
use crate::network::message::{Message, FLAG_CHECKSUM, FLAG_COMPRESS, FLAG_ENCRYPT, FLAG_ZERO};
use crate::network::options::Config;
use crate::network::ring_buffer::RingBuffer;
use crate::security::checksum::{hmac_md5, CHECKSUM_LEN};
use crate::security::Crypto;
use crate::{AppError, AppResult};

/// `len(2) || flag(2) || sn(2)` precede the optional checksum slot and the body.
const FIXED_PREFIX_LEN: usize = 6;

/// `code(2) || module(1) || action(1)` lead the body, before the payload.
const BODY_HEAD_LEN: usize = 4;

/// Offset of the checksum slot when checksums are enabled.
const CHECKSUM_OFFSET: usize = FIXED_PREFIX_LEN;

/// Packs messages into wire frames and reassembles frames back into messages.
///
/// Implementations transform the body symmetrically: whatever is applied on
/// pack must be undone on unpack given the same configuration and session
/// crypto state.
pub trait Datapack: Send + Sync {
    /// Fixed number of prefix bytes before the payload: 10 without checksums,
    /// 26 with.
    fn head_len(&self) -> usize;

    /// Appends one complete frame for `message` to `dst`.
    fn pack_into(
        &self,
        message: &Message,
        crypto: Option<&mut dyn Crypto>,
        hmac_key: Option<&[u8]>,
        dst: &mut BytesMut,
    ) -> AppResult<()>;

    /// Packs one message into a freshly allocated frame.
    fn pack(
        &self,
        message: &Message,
        crypto: Option<&mut dyn Crypto>,
        hmac_key: Option<&[u8]>,
    ) -> AppResult<Bytes> {
        let mut dst = BytesMut::with_capacity(self.head_len() + message.payload.len());
        self.pack_into(message, crypto, hmac_key, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Drains every complete frame buffered in `ring`, leaving any partial
    /// trailing frame in place for the next call.
    fn unpack(
        &self,
        ring: &mut RingBuffer,
        crypto: Option<&mut dyn Crypto>,
        hmac_key: Option<&[u8]>,
    ) -> AppResult<Vec<Message>>;
}

/// Length-Type-Data codec.
///
/// Wire layout, big-endian throughout:
///
/// ```text
/// len(2) || flag(2) || sn(2) || [checksum(16)] || body
/// body = code(2) || module(1) || action(1) || payload
/// ```
///
/// `len` counts the body bytes as transmitted, after compression and
/// encryption. The body is compressed first and encrypted second on the way
/// out, and the checksum is computed over the transformed frame with the slot
/// zeroed, so integrity can be verified without keys to the payload content.
/// Control frames (`FLAG_ZERO`) skip encryption and checksum computation so
/// the key exchange can complete in the clear.
pub struct LtdCodec {
    head_len: usize,
    whether_compress: bool,
    compress_threshold: usize,
    compressor: Option<Arc<dyn Compressor>>,
    whether_crypto: bool,
    whether_checksum: bool,
}

impl LtdCodec {
    pub fn new(
        whether_compress: bool,
        compress_threshold: usize,
        compressor: Option<Arc<dyn Compressor>>,
        whether_crypto: bool,
        whether_checksum: bool,
    ) -> Self {
        let head_len = if whether_checksum {
            FIXED_PREFIX_LEN + CHECKSUM_LEN + BODY_HEAD_LEN
        } else {
            FIXED_PREFIX_LEN + BODY_HEAD_LEN
        };
        Self {
            head_len,
            whether_compress,
            compress_threshold,
            compressor,
            whether_crypto,
            whether_checksum,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.whether_compress,
            config.compress_threshold,
            config.compressor.clone(),
            config.whether_crypto,
            config.whether_checksum,
        )
    }

    fn body_offset(&self) -> usize {
        self.head_len - BODY_HEAD_LEN
    }
}

impl Datapack for LtdCodec {
    fn head_len(&self) -> usize {
        self.head_len
    }

    fn pack_into(
        &self,
        message: &Message,
        crypto: Option<&mut dyn Crypto>,
        hmac_key: Option<&[u8]>,
        dst: &mut BytesMut,
    ) -> AppResult<()> {
        let mut flag = message.flag;

        let mut body = Vec::with_capacity(BODY_HEAD_LEN + message.payload.len());
        body.extend_from_slice(&message.code.to_be_bytes());
        body.push(message.module);
        body.push(message.action);
        body.extend_from_slice(&message.payload);

        if self.whether_compress {
            if let Some(compressor) = &self.compressor {
                if body.len() >= self.compress_threshold {
                    body = compressor.compress(&body)?;
                    flag |= FLAG_COMPRESS;
                }
            }
        }

        if self.whether_crypto && flag & FLAG_ZERO == 0 {
            let crypto = crypto.ok_or_else(|| {
                AppError::EncryptPayload("no session key installed".to_string())
            })?;
            body = crypto.encrypt(&body)?;
            flag |= FLAG_ENCRYPT;
        }

        if self.whether_checksum {
            flag |= FLAG_CHECKSUM;
        }

        if body.len() > u16::MAX as usize {
            return Err(AppError::FrameTooLarge(body.len()));
        }

        let frame_start = dst.len();
        dst.reserve(self.body_offset() + body.len());
        dst.put_u16(body.len() as u16);
        dst.put_u16(flag);
        dst.put_u16(message.sn);
        if self.whether_checksum {
            dst.put_bytes(0, CHECKSUM_LEN);
        }
        dst.put_slice(&body);

        if self.whether_checksum && flag & FLAG_ZERO == 0 {
            let tag = hmac_md5(hmac_key.unwrap_or(&[]), &dst[frame_start..]);
            let slot = frame_start + CHECKSUM_OFFSET;
            dst[slot..slot + CHECKSUM_LEN].copy_from_slice(&tag);
        }

        Ok(())
    }

    fn unpack(
        &self,
        ring: &mut RingBuffer,
        mut crypto: Option<&mut dyn Crypto>,
        hmac_key: Option<&[u8]>,
    ) -> AppResult<Vec<Message>> {
        let mut messages = Vec::new();

        loop {
            if ring.len() < self.head_len {
                break;
            }

            let body_len = {
                let prefix = ring.peek(2)?;
                u16::from_be_bytes([prefix[0], prefix[1]]) as usize
            };
            if body_len < BODY_HEAD_LEN {
                return Err(AppError::MalformedFrame("body length below body header"));
            }

            let frame_len = self.body_offset() + body_len;
            if ring.len() < frame_len {
                break;
            }

            let mut frame = ring.read(frame_len)?;
            let flag = u16::from_be_bytes([frame[2], frame[3]]);
            let sn = u16::from_be_bytes([frame[4], frame[5]]);

            let mut checksum = None;
            if self.whether_checksum {
                if flag & FLAG_CHECKSUM == 0 {
                    return Err(AppError::NoChecksumFlag);
                }
                if flag & FLAG_ZERO == 0 {
                    let mut tag = [0u8; CHECKSUM_LEN];
                    tag.copy_from_slice(&frame[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN]);
                    frame[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].fill(0);
                    let calc = hmac_md5(hmac_key.unwrap_or(&[]), &frame);
                    if calc != tag {
                        return Err(AppError::VerifyChecksum);
                    }
                    checksum = Some(tag);
                }
            }

            let mut body = frame.split_off(self.body_offset());

            if flag & FLAG_ENCRYPT != 0 && flag & FLAG_ZERO == 0 {
                body = match crypto.as_mut() {
                    Some(crypto) => crypto.decrypt(&body)?,
                    None => {
                        return Err(AppError::DecryptPayload(
                            "no session key installed".to_string(),
                        ))
                    }
                };
            }

            if flag & FLAG_COMPRESS != 0 {
                let compressor = self.compressor.as_ref().ok_or_else(|| {
                    AppError::DecompressPayload("no decompressor configured".to_string())
                })?;
                body = compressor.decompress(&body)?;
            }

            if body.len() < BODY_HEAD_LEN {
                return Err(AppError::MalformedFrame("decoded body below body header"));
            }

            let code = u16::from_be_bytes([body[0], body[1]]);
            let module = body[2];
            let action = body[3];
            let payload = Bytes::from(body.split_off(BODY_HEAD_LEN));

            let mut message = Message::new(flag, sn, code, module, action, payload);
            message.checksum = checksum;
            messages.push(message);
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Rc4Crypto;

    /// 1:1 mapping, isolates codec behaviour from the compression algorithm.
    struct IdentityCompressor;

    impl Compressor for IdentityCompressor {
        fn compress(&self, data: &[u8]) -> AppResult<Vec<u8>> {
            Ok(data.to_vec())
        }

        fn decompress(&self, data: &[u8]) -> AppResult<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    fn plain_codec() -> LtdCodec {
        LtdCodec::new(false, 0, None, false, false)
    }

    fn session_key() -> Vec<u8> {
        b"12345678".repeat(12)
    }

    fn ring_with(frames: &[u8]) -> RingBuffer {
        let mut ring = RingBuffer::with_capacity(frames.len().max(64) * 2);
        ring.write_n(frames).unwrap();
        ring
    }

    #[test]
    fn bare_frame_layout() {
        let codec = plain_codec();
        assert_eq!(codec.head_len(), 10);

        let message = Message::new(0, 1, 0, 1, 2, &b"hi"[..]);
        let frame = codec.pack(&message, None, None).unwrap();
        assert_eq!(
            frame.as_ref(),
            &[0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x02, 0x68, 0x69]
        );
    }

    #[test]
    fn empty_payload_is_legal() {
        let codec = plain_codec();
        let message = Message::new(0, 9, 0, 1, 1, Bytes::new());
        let frame = codec.pack(&message, None, None).unwrap();
        // four body-header bytes only
        assert_eq!(&frame[..2], &[0x00, 0x04]);
        assert_eq!(frame.len(), 10);

        let mut ring = ring_with(&frame);
        let out = codec.unpack(&mut ring, None, None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].payload.is_empty());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn code_round_trips() {
        let codec = plain_codec();
        let message = Message::new(0, 3, 0x0207, 5, 6, &b"oops"[..]);
        let frame = codec.pack(&message, None, None).unwrap();
        let out = codec.unpack(&mut ring_with(&frame), None, None).unwrap();
        assert_eq!(out[0].code, 0x0207);
        assert_eq!(out[0].sn, 3);
        assert_eq!(out[0].payload.as_ref(), b"oops");
    }

    #[test]
    fn compress_then_encrypt_round_trip() {
        let codec = LtdCodec::new(true, 64, Some(Arc::new(IdentityCompressor)), true, false);
        let mut enc = Rc4Crypto::new(&session_key()).unwrap();
        let mut dec = Rc4Crypto::new(&session_key()).unwrap();

        let payload = vec![0u8; 128];
        let message = Message::new(0, 7, 0, 3, 4, payload.clone());
        let frame = codec
            .pack(&message, Some(&mut enc as &mut dyn Crypto), None)
            .unwrap();

        let mut ring = ring_with(&frame);
        let out = codec
            .unpack(&mut ring, Some(&mut dec as &mut dyn Crypto), None)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].flag & FLAG_COMPRESS, FLAG_COMPRESS);
        assert_eq!(out[0].flag & FLAG_ENCRYPT, FLAG_ENCRYPT);
        assert_eq!(out[0].sn, 7);
        assert_eq!(out[0].module, 3);
        assert_eq!(out[0].action, 4);
        assert_eq!(out[0].payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn compression_is_threshold_gated() {
        let codec = LtdCodec::new(true, 64, Some(Arc::new(IdentityCompressor)), false, false);
        let message = Message::new(0, 1, 0, 1, 1, &b"tiny"[..]);
        let frame = codec.pack(&message, None, None).unwrap();
        let flag = u16::from_be_bytes([frame[2], frame[3]]);
        assert_eq!(flag & FLAG_COMPRESS, 0);
    }

    #[test]
    fn data_frame_without_key_fails_when_crypto_required() {
        let codec = LtdCodec::new(false, 0, None, true, false);
        let message = Message::new(0, 1, 0, 1, 1, &b"early"[..]);
        assert!(matches!(
            codec.pack(&message, None, None),
            Err(AppError::EncryptPayload(_))
        ));
    }

    #[test]
    fn zero_frame_bypasses_encryption() {
        let codec = LtdCodec::new(false, 0, None, true, false);
        let message = Message::zero(3, &b"ping"[..]);
        // no crypto instance needed for control frames
        let frame = codec.pack(&message, None, None).unwrap();
        let flag = u16::from_be_bytes([frame[2], frame[3]]);
        assert_eq!(flag & FLAG_ENCRYPT, 0);

        let out = codec.unpack(&mut ring_with(&frame), None, None).unwrap();
        assert_eq!(out[0].payload.as_ref(), b"ping");
    }

    #[test]
    fn checksum_head_len_and_round_trip() {
        let codec = LtdCodec::new(false, 0, None, false, true);
        assert_eq!(codec.head_len(), 26);

        let message = Message::new(0, 2, 0, 1, 1, &b"guarded"[..]);
        let frame = codec.pack(&message, None, Some(b"hmac key")).unwrap();
        assert_eq!(frame.len(), 26 + 7);

        let out = codec
            .unpack(&mut ring_with(&frame), None, Some(b"hmac key"))
            .unwrap();
        assert_eq!(out[0].payload.as_ref(), b"guarded");
        assert!(out[0].checksum.is_some());
    }

    #[test]
    fn tampered_frame_fails_verification() {
        let codec = LtdCodec::new(false, 0, None, false, true);
        let message = Message::new(0, 2, 0, 1, 1, &b"guarded payload"[..]);
        let frame = codec.pack(&message, None, Some(b"hmac key")).unwrap();

        // pristine bytes verify
        let ok = codec.unpack(&mut ring_with(&frame), None, Some(b"hmac key"));
        assert!(ok.is_ok());

        // flip one bit inside the body
        let mut tampered = frame.to_vec();
        tampered[26] ^= 0x01;
        let err = codec
            .unpack(&mut ring_with(&tampered), None, Some(b"hmac key"))
            .unwrap_err();
        assert!(matches!(err, AppError::VerifyChecksum));
    }

    #[test]
    fn checksum_requires_flag() {
        let plain = plain_codec();
        let checked = LtdCodec::new(false, 0, None, false, true);

        let message = Message::new(0, 1, 0, 1, 1, &b"x"[..]);
        let frame = plain.pack(&message, None, None).unwrap();
        let err = checked
            .unpack(&mut ring_with(&frame), None, Some(b"k"))
            .unwrap_err();
        assert!(matches!(err, AppError::NoChecksumFlag));
    }

    #[test]
    fn zero_frame_skips_checksum_verification() {
        let codec = LtdCodec::new(false, 0, None, false, true);
        let message = Message::zero(3, &b"hb"[..]);
        let frame = codec.pack(&message, None, Some(b"key")).unwrap();
        // slot stays zeroed for control frames
        assert_eq!(&frame[6..22], &[0u8; 16]);

        // verifier side may hold a different key and still accept it
        let out = codec
            .unpack(&mut ring_with(&frame), None, Some(b"other key"))
            .unwrap();
        assert_eq!(out[0].payload.as_ref(), b"hb");
    }

    #[test]
    fn partial_frames_stay_buffered() {
        let codec = plain_codec();
        let m1 = Message::new(0, 1, 0, 1, 1, &b"first"[..]);
        let m2 = Message::new(0, 2, 0, 1, 2, &b"second"[..]);
        let m3 = Message::new(0, 3, 0, 1, 3, &b"third"[..]);

        let mut stream = Vec::new();
        for m in [&m1, &m2, &m3] {
            stream.extend_from_slice(&codec.pack(m, None, None).unwrap());
        }

        let f1_len = 10 + 5;
        let mut ring = RingBuffer::with_capacity(256);

        // chunk 1 ends mid-header of the second frame
        ring.write_n(&stream[..f1_len + 4]).unwrap();
        let out = codec.unpack(&mut ring, None, None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sn, 1);

        // chunk 2 still leaves the second frame incomplete
        ring.write_n(&stream[f1_len + 4..f1_len + 8]).unwrap();
        let out = codec.unpack(&mut ring, None, None).unwrap();
        assert!(out.is_empty());

        // final chunk completes frames two and three
        ring.write_n(&stream[f1_len + 8..]).unwrap();
        let out = codec.unpack(&mut ring, None, None).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sn, 2);
        assert_eq!(out[1].sn, 3);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn oversized_body_is_rejected_on_pack() {
        let codec = plain_codec();
        let message = Message::new(0, 1, 0, 1, 1, vec![0u8; u16::MAX as usize]);
        assert!(matches!(
            codec.pack(&message, None, None),
            Err(AppError::FrameTooLarge(_))
        ));
    }
}
