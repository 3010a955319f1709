//! Session-token authentication for the WebSocket upgrade.
//!
//! Auth.js session cookies carry a compact JWE (DIRECT key management,
//! A256GCM content encryption) whose key is HKDF-derived from the shared
//! secret. The decrypted claims are re-signed as an HS256 JWT over the same
//! secret and verified — signature and expiration — and the email claim is
//! resolved to a user row. Any token failure or unknown email rejects the
//! upgrade with HTTP 401.

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hkdf::Hkdf;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::Sha256;
use store::{Store, User};
use thiserror::Error;

/// Name of the session cookie, doubling as the HKDF salt.
pub const SESSION_COOKIE: &str = "authjs.session-token";

/// Authentication failures. All map to HTTP 401 on the upgrade path,
/// except `Lookup`, which is a store fault rather than an auth decision
/// and maps to HTTP 500.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing session token cookie")]
    MissingCookie,

    #[error("invalid session token: {0}")]
    BadToken(String),

    #[error("session token expired")]
    Expired,

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("user lookup failed: {0}")]
    Lookup(#[from] store::StoreError),
}

/// Claims extracted from a verified session token.
#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub email: String,
    pub sub: Option<String>,
}

/// Derive the A256GCM content-encryption key from the shared secret.
///
/// HKDF-SHA256 with the cookie name as salt and the Auth.js info string,
/// matching what the token issuer derives.
pub fn derive_encryption_key(secret: &str) -> [u8; 32] {
    let info = format!("Auth.js Generated Encryption Key ({SESSION_COOKIE})");
    let hkdf = Hkdf::<Sha256>::new(Some(SESSION_COOKIE.as_bytes()), secret.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(info.as_bytes(), &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::BadToken(format!("bad base64 segment: {e}")))
}

/// Decrypt the compact JWE and return the raw claims.
fn decrypt_session_token(token: &str, secret: &str) -> Result<serde_json::Value, AuthError> {
    use aes_gcm::aead::{Aead, Payload};
    use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 5 {
        return Err(AuthError::BadToken("malformed JWE".to_string()));
    }

    let header: serde_json::Value = serde_json::from_slice(&decode_segment(segments[0])?)
        .map_err(|e| AuthError::BadToken(format!("bad JWE header: {e}")))?;
    if header.get("alg").and_then(|v| v.as_str()) != Some("dir")
        || header.get("enc").and_then(|v| v.as_str()) != Some("A256GCM")
    {
        return Err(AuthError::BadToken("unsupported JWE algorithm".to_string()));
    }
    if !segments[1].is_empty() {
        // DIRECT key management carries no encrypted key.
        return Err(AuthError::BadToken("unexpected encrypted key".to_string()));
    }

    let iv = decode_segment(segments[2])?;
    let ciphertext = decode_segment(segments[3])?;
    let tag = decode_segment(segments[4])?;
    if iv.len() != 12 || tag.len() != 16 {
        return Err(AuthError::BadToken("bad IV or tag length".to_string()));
    }

    let key = derive_encryption_key(secret);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| AuthError::BadToken("bad key length".to_string()))?;
    let mut message = ciphertext;
    message.extend_from_slice(&tag);
    // The protected header segment is the AAD, as raw ASCII.
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &message,
                aad: segments[0].as_bytes(),
            },
        )
        .map_err(|_| AuthError::BadToken("decryption failed".to_string()))?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| AuthError::BadToken(format!("bad claims payload: {e}")))
}

/// Re-sign the decrypted claims with HS256 and verify them, then pull out
/// the identity fields.
fn verify_claims(claims: &serde_json::Value, secret: &str) -> Result<SessionClaims, AuthError> {
    let signed = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::BadToken(e.to_string()))?;

    let validation = Validation::new(Algorithm::HS256);
    let verified = decode::<serde_json::Value>(
        &signed,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::BadToken(e.to_string()),
    })?;

    let email = verified
        .claims
        .get("email")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AuthError::BadToken("missing email claim".to_string()))?
        .to_string();
    let sub = verified
        .claims
        .get("sub")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(SessionClaims { email, sub })
}

/// Pull the session cookie out of the request headers.
fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Verify the session token on an upgrade request: cookie → JWE decrypt →
/// JWT verify.
fn verify_session(headers: &HeaderMap, secret: &str) -> Result<SessionClaims, AuthError> {
    let token = session_token_from_headers(headers).ok_or(AuthError::MissingCookie)?;
    let claims = decrypt_session_token(&token, secret)?;
    verify_claims(&claims, secret)
}

/// Authenticate an upgrade request and resolve the user it belongs to.
pub async fn authenticate(
    headers: &HeaderMap,
    secret: &str,
    store: &Store,
) -> Result<User, AuthError> {
    let claims = verify_session(headers, secret)?;
    store
        .get_user_by_email(&claims.email)
        .await?
        .ok_or(AuthError::UnknownUser(claims.email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    /// Build a compact JWE the way the token issuer would.
    fn build_jwe(claims: &serde_json::Value, secret: &str) -> String {
        use aes_gcm::aead::{Aead, Payload};
        use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

        let header_b64 = URL_SAFE_NO_PAD.encode(br#"{"alg":"dir","enc":"A256GCM"}"#);
        let iv = [7u8; 12];
        let key = derive_encryption_key(secret);
        let cipher = Aes256Gcm::new_from_slice(&key).unwrap();
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: claims.to_string().as_bytes(),
                    aad: header_b64.as_bytes(),
                },
            )
            .unwrap();
        let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);
        format!(
            "{}..{}.{}.{}",
            header_b64,
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag)
        )
    }

    fn claims_expiring_in(secs: i64) -> serde_json::Value {
        serde_json::json!({
            "email": "alice@example.com",
            "sub": "user-1",
            "exp": chrono::Utc::now().timestamp() + secs,
        })
    }

    fn headers_with_cookie(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("other=1; {SESSION_COOKIE}={token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        assert_eq!(derive_encryption_key(SECRET), derive_encryption_key(SECRET));
        assert_ne!(
            derive_encryption_key(SECRET),
            derive_encryption_key("another-secret")
        );
    }

    #[test]
    fn test_valid_token_round_trip() {
        let token = build_jwe(&claims_expiring_in(3600), SECRET);
        let claims = verify_session(&headers_with_cookie(&token), SECRET).unwrap();
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_missing_cookie() {
        let headers = HeaderMap::new();
        assert!(matches!(
            verify_session(&headers, SECRET),
            Err(AuthError::MissingCookie)
        ));
    }

    #[test]
    fn test_expired_token() {
        // Past the default validation leeway.
        let token = build_jwe(&claims_expiring_in(-3600), SECRET);
        assert!(matches!(
            verify_session(&headers_with_cookie(&token), SECRET),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_wrong_secret_fails_decryption() {
        let token = build_jwe(&claims_expiring_in(3600), "issuer-secret");
        assert!(matches!(
            verify_session(&headers_with_cookie(&token), SECRET),
            Err(AuthError::BadToken(_))
        ));
    }

    #[test]
    fn test_garbage_token() {
        assert!(matches!(
            verify_session(&headers_with_cookie("not-a-jwe"), SECRET),
            Err(AuthError::BadToken(_))
        ));
    }

    #[test]
    fn test_unsupported_enc_header() {
        let token = build_jwe(&claims_expiring_in(3600), SECRET);
        let bad_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"dir","enc":"A128CBC-HS256"}"#);
        let (_, rest) = token.split_once('.').unwrap();
        let swapped = format!("{bad_header}.{rest}");
        assert!(matches!(
            verify_session(&headers_with_cookie(&swapped), SECRET),
            Err(AuthError::BadToken(_))
        ));
    }
}
