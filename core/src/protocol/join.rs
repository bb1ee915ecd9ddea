// Join request framing — BHTTP request carrying one recovered token

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use super::wire::Token;
use crate::bhttp::{BhttpError, BinaryHttpMessage, Fields, RequestControlData};
use crate::clock::http_date;

pub const JOIN_VERSION: &str = "v2";
const JOIN_METHOD: &str = "POST";
const JOIN_SCHEME: &str = "https";

/// ACT fingerprint of a hash set: `types/{set_type}/sets/{hash_set}`
pub fn fingerprint(set_type: &str, hash_set: &str) -> String {
    format!("types/{}/sets/{}", set_type, hash_set)
}

pub fn join_path(set_type: &str, hash_set: &str) -> String {
    format!("/{}/{}:join", JOIN_VERSION, fingerprint(set_type, hash_set))
}

#[derive(Serialize)]
struct JoinBody {
    act: ActTokenBody,
}

#[derive(Serialize)]
struct ActTokenBody {
    nonce_bytes: String,
    token_v0: TokenV0Body,
}

#[derive(Serialize)]
struct TokenV0Body {
    bb_signature: String,
}

/// `{"act":{"nonce_bytes":..,"token_v0":{"bb_signature":..}}}`, base64 with padding
pub fn join_body(token: &Token) -> Result<Vec<u8>, serde_json::Error> {
    let bb_signature = token
        .token_v0
        .as_ref()
        .map(|t| STANDARD.encode(&t.bb_signature))
        .unwrap_or_default();
    let body = JoinBody {
        act: ActTokenBody {
            nonce_bytes: STANDARD.encode(&token.nonce_bytes),
            token_v0: TokenV0Body { bb_signature },
        },
    };
    serde_json::to_vec(&body)
}

/// Known-length BHTTP POST for one hash set
pub fn build_join_request(
    authority: &str,
    set_type: &str,
    hash_set: &str,
    token: &Token,
    now: u64,
) -> Result<BinaryHttpMessage, serde_json::Error> {
    let body = join_body(token)?;
    let control = RequestControlData::new(
        JOIN_METHOD,
        JOIN_SCHEME,
        authority,
        &join_path(set_type, hash_set),
    );
    let headers = Fields::new()
        .with("content-length", &body.len().to_string())
        .with("date", &http_date(now));
    Ok(BinaryHttpMessage::known_length_request(control)
        .with_header_fields(headers)
        .with_content(body))
}

/// Final status code of a decoded join response
pub fn join_response_status(response: &[u8]) -> Result<u16, BhttpError> {
    let message = BinaryHttpMessage::deserialize(response)?;
    message
        .response_control()
        .map(|control| control.final_status_code)
        .ok_or(BhttpError::ControlDataMismatch)
}
