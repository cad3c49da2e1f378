use std::fmt;

use bytes::Bytes;

/// Session identifier, unique per connection within the process lifetime.
pub type SessionId = u64;

/// Payload was compressed before transmission.
pub const FLAG_COMPRESS: u16 = 0x0001;

/// Payload was encrypted before transmission.
pub const FLAG_ENCRYPT: u16 = 0x0010;

/// Frame carries a checksum slot.
pub const FLAG_CHECKSUM: u16 = 0x0100;

/// Control-plane frame, handled in-session and never routed to user handlers.
pub const FLAG_ZERO: u16 = 0x1000;

/// Control actions carried under [`FLAG_ZERO`].
pub const ZERO_ACTION_EXCHANGE_KEY_REQUEST: u8 = 1;
pub const ZERO_ACTION_EXCHANGE_KEY_RESPONSE: u8 = 2;
pub const ZERO_ACTION_HEARTBEAT: u8 = 3;

/// A logical unit exchanged with a peer.
///
/// `sn` is supplied by the requesting side and echoed back unchanged so the
/// client can pair responses with requests; server-initiated messages carry 0.
/// `module`/`action` select the handler in the router. `code` is an error
/// code, zero on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Assigned by the receive path; zero on messages constructed for send.
    pub session_id: SessionId,
    pub flag: u16,
    pub sn: u16,
    pub code: u16,
    pub module: u8,
    pub action: u8,
    pub payload: Bytes,
    /// Filled in by the codec during unpack when checksums are enabled.
    pub checksum: Option<[u8; 16]>,
}

impl Message {
    pub fn new(
        flag: u16,
        sn: u16,
        code: u16,
        module: u8,
        action: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            session_id: 0,
            flag,
            sn,
            code,
            module,
            action,
            payload: payload.into(),
            checksum: None,
        }
    }

    /// A plain data message addressed to `(module, action)`.
    pub fn request(sn: u16, module: u8, action: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(0, sn, 0, module, action, payload)
    }

    /// A response echoing the request's sequence number.
    pub fn response(request: &Message, code: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(0, request.sn, code, request.module, request.action, payload)
    }

    /// A control-plane message carried under [`FLAG_ZERO`].
    pub fn zero(action: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(FLAG_ZERO, 0, 0, 0, action, payload)
    }

    pub fn is_zero(&self) -> bool {
        self.flag & FLAG_ZERO != 0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sn: {}, module: {}, action: {}",
            self.sn, self.module, self.action
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_echoes_sn_and_route() {
        let req = Message::request(42, 3, 7, Bytes::from_static(b"enter"));
        let resp = Message::response(&req, 0, Bytes::new());
        assert_eq!(resp.sn, 42);
        assert_eq!(resp.module, 3);
        assert_eq!(resp.action, 7);
        assert_eq!(resp.code, 0);
    }

    #[test]
    fn zero_message_is_control_plane() {
        let hb = Message::zero(ZERO_ACTION_HEARTBEAT, Bytes::new());
        assert!(hb.is_zero());
        assert_eq!(hb.sn, 0);
        assert_eq!(format!("{}", hb), "sn: 0, module: 0, action: 3");
    }
}
