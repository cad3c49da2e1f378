use x25519_dalek::StaticSecret;

use crate::network::{Message, ZERO_ACTION_EXCHANGE_KEY_REQUEST, ZERO_ACTION_EXCHANGE_KEY_RESPONSE};
use crate::security::ecdh::{self, ExchangeRequest, ExchangeResponse, NONCE_LEN};
use crate::{AppError, AppResult};

/// Initiator-side handshake state, stashed on the session between emitting
/// the request and receiving the response, then taken and cleared atomically.
pub struct HandshakeState {
    pub private_key: StaticSecret,
    pub nonce: [u8; NONCE_LEN],
}

/// Builds a key-exchange request: a fresh keypair and nonce, the state the
/// initiator must keep, and the control frame to send.
pub fn exchange_key_request() -> (HandshakeState, Message) {
    let (public_key, private_key) = ecdh::generate_keys();
    let nonce = ecdh::generate_nonce();

    let request = ExchangeRequest {
        public_key: hex::encode(public_key.as_bytes()),
        r: hex::encode(nonce),
    };
    let payload = serde_json::to_vec(&request).expect("exchange request serializes");
    let message = Message::zero(ZERO_ACTION_EXCHANGE_KEY_REQUEST, payload);

    (HandshakeState { private_key, nonce }, message)
}

/// Responder side: parses the request, generates its own keypair and nonce,
/// and derives the session key. Returns the key together with the response
/// frame to send back.
pub fn exchange_key_response(request_payload: &[u8]) -> AppResult<(Vec<u8>, Message)> {
    if request_payload.is_empty() {
        return Err(AppError::Handshake("empty exchange request".to_string()));
    }
    let request: ExchangeRequest = serde_json::from_slice(request_payload)?;
    let peer_public = decode_hex("public_key", &request.public_key)?;
    let peer_nonce = decode_hex("r", &request.r)?;

    let (public_key, private_key) = ecdh::generate_keys();
    let nonce = ecdh::generate_nonce();

    let shared = ecdh::shared_key(&private_key, &peer_public)?;
    let key = ecdh::build_key(&shared, &nonce, &peer_nonce);

    let response = ExchangeResponse {
        public_key: hex::encode(public_key.as_bytes()),
        r: hex::encode(nonce),
    };
    let payload = serde_json::to_vec(&response).expect("exchange response serializes");
    let message = Message::zero(ZERO_ACTION_EXCHANGE_KEY_RESPONSE, payload);

    Ok((key, message))
}

/// Initiator side: parses the response against the stashed state and derives
/// the same session key the responder computed.
pub fn exchange_key_parse_response(
    response_payload: &[u8],
    state: &HandshakeState,
) -> AppResult<Vec<u8>> {
    if response_payload.is_empty() {
        return Err(AppError::Handshake("empty exchange response".to_string()));
    }
    let response: ExchangeResponse = serde_json::from_slice(response_payload)?;
    let peer_public = decode_hex("public_key", &response.public_key)?;
    let peer_nonce = decode_hex("r", &response.r)?;

    let shared = ecdh::shared_key(&state.private_key, &peer_public)?;
    Ok(ecdh::build_key(&shared, &peer_nonce, &state.nonce))
}

fn decode_hex(field: &str, value: &str) -> AppResult<Vec<u8>> {
    hex::decode(value).map_err(|e| AppError::Handshake(format!("bad hex in {}: {}", field, e)))
}
