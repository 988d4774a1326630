use crate::peer::types::ServerConfig;
use rand::Rng;

const ICE_SCHEMES: [&str; 3] = ["stun:", "turn:", "turns:"];

/// Short random hex token, used for negotiation session ids.
pub fn random_id() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    hex::encode(bytes)
}

/// The server URL as `RTCIceServer` expects it. A bare `host:port` gets the
/// scheme named by the entry's type; unknown types count as STUN.
pub fn ice_url(server: &ServerConfig) -> String {
    if ICE_SCHEMES.iter().any(|s| server.url.starts_with(s)) {
        return server.url.clone();
    }
    let scheme = match server.r#type.as_str() {
        "turn" => "turn:",
        "turns" => "turns:",
        _ => "stun:",
    };
    format!("{scheme}{}", server.url)
}
