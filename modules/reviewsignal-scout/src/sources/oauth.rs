//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! The signature base string covers exactly the parameters sent on the wire
//! plus the `oauth_*` protocol parameters, each RFC 3986 percent-encoded,
//! sorted by name, and joined with `&`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::SourceError;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: String,
    pub token_secret: String,
}

impl OAuthCredentials {
    pub fn is_complete(&self) -> bool {
        !self.consumer_key.is_empty()
            && !self.consumer_secret.is_empty()
            && !self.token.is_empty()
            && !self.token_secret.is_empty()
    }
}

/// RFC 3986 unreserved characters pass through, everything else is %XX.
pub fn percent_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// `k=v&k=v` with encoded keys and values, in the given order.
pub fn encode_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_pair((k, v): &(&str, &str)) -> (String, String) {
    (percent_encode(k), percent_encode(v))
}

fn protocol_params<'a>(
    creds: &'a OAuthCredentials,
    nonce: &'a str,
    timestamp: &'a str,
) -> [(&'static str, &'a str); 6] {
    [
        ("oauth_consumer_key", creds.consumer_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", creds.token.as_str()),
        ("oauth_version", "1.0"),
    ]
}

pub fn signature_base_string(
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    creds: &OAuthCredentials,
    nonce: &str,
    timestamp: &str,
) -> String {
    let mut encoded: Vec<(String, String)> = params.iter().map(encode_pair).collect();
    encoded.extend(protocol_params(creds, nonce, timestamp).iter().map(encode_pair));
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(base_url),
        percent_encode(&param_string)
    )
}

pub fn sign(
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    creds: &OAuthCredentials,
    nonce: &str,
    timestamp: &str,
) -> Result<String, SourceError> {
    let base = signature_base_string(method, base_url, params, creds, nonce, timestamp);
    let key = format!(
        "{}&{}",
        percent_encode(&creds.consumer_secret),
        percent_encode(&creds.token_secret)
    );
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| SourceError::Config(format!("invalid signing key: {e}")))?;
    mac.update(base.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Value for the `Authorization` header.
pub fn authorization_header(
    method: &str,
    base_url: &str,
    params: &[(&str, &str)],
    creds: &OAuthCredentials,
    nonce: &str,
    timestamp: &str,
) -> Result<String, SourceError> {
    let signature = sign(method, base_url, params, creds, nonce, timestamp)?;
    let mut fields: Vec<(&str, &str)> = protocol_params(creds, nonce, timestamp).to_vec();
    fields.push(("oauth_signature", signature.as_str()));
    fields.sort();

    let joined = fields
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {joined}"))
}

/// Fresh alphanumeric nonce.
pub fn nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
