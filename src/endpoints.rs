//! Server address normalization and endpoint derivation
//!
//! Operators type the server address in many shapes: bare `host:port`, an
//! `http(s)://` base, or a URL copied from a previous signaling/upload call.
//! Everything funnels through [`normalize_base_url`] so that the signaling
//! socket, frame upload and ICE server list all agree on one base.

use url::Url;

/// Path of the signaling WebSocket, relative to the base.
pub const SIGNALING_PATH: &str = "/v1/ws";
/// Query attached to the signaling URL.
pub const SIGNALING_QUERY: &str = "role=client";
/// Path of the still-frame upload endpoint, relative to the base.
pub const FRAME_UPLOAD_PATH: &str = "/v1/frames";

const FALLBACK_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
];
const HOST_STUN_PORT: u16 = 3478;

const KNOWN_SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

/// Normalize a user supplied server address into a scheme-qualified base URL.
///
/// Trims whitespace and trailing slashes, infers `http://` when no scheme is
/// present and strips any signaling or upload suffix left over from a
/// previously derived URL. The result never ends in `/`.
pub fn normalize_base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    let with_scheme = if KNOWN_SCHEMES.iter().any(|s| trimmed.starts_with(s)) {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let signaling_suffix = format!("{}?{}", SIGNALING_PATH, SIGNALING_QUERY);
    let stripped = with_scheme
        .strip_suffix(signaling_suffix.as_str())
        .or_else(|| with_scheme.strip_suffix(SIGNALING_PATH))
        .or_else(|| with_scheme.strip_suffix(FRAME_UPLOAD_PATH))
        .unwrap_or(&with_scheme);

    stripped.trim_end_matches('/').to_string()
}

/// WebSocket URL of the signaling endpoint (`http→ws`, `https→wss`).
pub fn signaling_url(address: &str) -> String {
    let base = normalize_base_url(address);
    let ws_base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else {
        base
    };

    format!("{}{}?{}", ws_base, SIGNALING_PATH, SIGNALING_QUERY)
}

/// HTTP URL of the frame upload endpoint (`ws→http`, `wss→https`).
pub fn frame_upload_url(address: &str) -> String {
    let base = normalize_base_url(address);
    let http_base = if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else {
        base
    };

    format!("{}{}", http_base, FRAME_UPLOAD_PATH)
}

/// Host component of the normalized base, if it parses.
pub fn server_host(address: &str) -> Option<String> {
    let base = normalize_base_url(address);
    Url::parse(&base)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_string()))
        .filter(|h| !h.trim().is_empty())
}

/// STUN servers for a session: the public fallbacks followed by the server
/// host itself. Duplicates are removed, first occurrence wins.
pub fn ice_server_urls(address: &str) -> Vec<String> {
    let mut urls: Vec<String> = FALLBACK_STUN_SERVERS.iter().map(|s| s.to_string()).collect();

    if let Some(host) = server_host(address) {
        // Url keeps IPv6 hosts bracketed, which is what the stun: form expects.
        let candidate = format!("stun:{}:{}", host, HOST_STUN_PORT);
        if !urls.contains(&candidate) {
            urls.push(candidate);
        }
    }

    urls
}

/// All endpoints derived from one server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoints {
    pub base: String,
    pub signaling: String,
    pub frame_upload: String,
    pub ice_servers: Vec<String>,
}

impl ServerEndpoints {
    pub fn derive(address: &str) -> Self {
        Self {
            base: normalize_base_url(address),
            signaling: signaling_url(address),
            frame_upload: frame_upload_url(address),
            ice_servers: ice_server_urls(address),
        }
    }
}
