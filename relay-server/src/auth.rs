//! Session auth (challenge → signed-event verify → JWT), the wallet
//! sidecar's HMAC scheme, and the relay's own signing key parsing.

use crate::error::{ApiError, ApiResult};
use bech32::FromBase32;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature as SchnorrSignature, SigningKey, VerifyingKey};
use rand::RngCore;
use relay_core::event::Event;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const JWT_TTL: ChronoDuration = ChronoDuration::hours(24);
const HMAC_WINDOW: ChronoDuration = ChronoDuration::minutes(5);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub exp: i64,
}

pub fn issue_jwt(secret: &str, pubkey: &str) -> ApiResult<(String, chrono::DateTime<Utc>)> {
    let expires_at = Utc::now() + JWT_TTL;
    let claims = Claims {
        user_id: pubkey.to_string(),
        email: format!("{pubkey}@relay.local"),
        exp: expires_at.timestamp(),
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Unauthorized(format!("jwt encode failed: {e}")))?;
    Ok((token, expires_at))
}

pub fn verify_jwt(secret: &str, token: &str) -> ApiResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ApiError::Unauthorized(format!("invalid token: {e}")))?;
    Ok(data.claims)
}

/// A random challenge string the client must sign with an event over its
/// own pubkey. Valid for three minutes (spec.md §3).
pub fn generate_challenge() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let challenge = hex::encode(bytes);
    let challenge_hash = hex::encode(Sha256::digest(bytes));
    (challenge, challenge_hash)
}

/// Verify a BIP340 Schnorr signature over a Nostr event id (the event's
/// `id` is the sha256 of its serialized form; `sig` is the 64-byte
/// signature, both hex-encoded).
pub fn verify_event_signature(event: &Event) -> ApiResult<()> {
    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| ApiError::InvalidInput(format!("bad pubkey hex: {e}")))?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes)
        .map_err(|e| ApiError::Unauthorized(format!("bad pubkey: {e}")))?;

    let sig_bytes = hex::decode(&event.sig).map_err(|e| ApiError::InvalidInput(format!("bad sig hex: {e}")))?;
    let signature = SchnorrSignature::try_from(sig_bytes.as_slice())
        .map_err(|e| ApiError::Unauthorized(format!("bad signature encoding: {e}")))?;

    let id_bytes = hex::decode(&event.id).map_err(|e| ApiError::InvalidInput(format!("bad id hex: {e}")))?;

    verifying_key
        .verify(&id_bytes, &signature)
        .map_err(|_| ApiError::Unauthorized("signature verification failed".to_string()))
}

/// Kind used for subscription-renewal notifications. The schema also
/// recognizes 764 for older clients; this relay only ever emits 888.
pub const SUBSCRIPTION_EVENT_KIND: u64 = 888;

/// Build and sign the subscription-renewal event re-emitted after a wallet
/// payment updates a subscriber's tier (spec.md §4.7 step 7).
pub fn sign_subscription_event(
    relay_private_key: &[u8; 32],
    relay_pubkey_hex: &str,
    npub: &str,
    tier: &str,
    expires_at: DateTime<Utc>,
) -> ApiResult<Event> {
    let signing_key = SigningKey::from_bytes(relay_private_key)
        .map_err(|e| ApiError::InvalidInput(format!("bad relay private key: {e}")))?;

    let created_at = Utc::now().timestamp();
    let tags = vec![
        vec!["p".to_string(), npub.to_string()],
        vec!["tier".to_string(), tier.to_string()],
        vec!["expires_at".to_string(), expires_at.timestamp().to_string()],
    ];
    let content = String::new();

    let canonical = serde_json::to_vec(&(0, relay_pubkey_hex, created_at, SUBSCRIPTION_EVENT_KIND, &tags, &content))
        .map_err(|e| ApiError::InvalidInput(format!("failed to canonicalize event: {e}")))?;
    let id_bytes = Sha256::digest(&canonical);
    let id = hex::encode(id_bytes);

    let signature: SchnorrSignature = signing_key.sign(&id_bytes);

    Ok(Event {
        id,
        pubkey: relay_pubkey_hex.to_string(),
        kind: SUBSCRIPTION_EVENT_KIND,
        created_at,
        tags,
        content,
        sig: hex::encode(signature.to_bytes()),
    })
}

/// Wallet-sidecar HMAC: `X-Signature` = hex(HMAC-SHA256(secret, api_key || timestamp || body)).
pub fn verify_wallet_hmac(
    secret: &str,
    api_key_header: &str,
    expected_api_key: &str,
    timestamp_header: &str,
    signature_header: &str,
    body: &[u8],
) -> ApiResult<()> {
    if api_key_header != expected_api_key {
        return Err(ApiError::Unauthorized("unknown API key".to_string()));
    }

    let ts = chrono::DateTime::parse_from_rfc3339(timestamp_header)
        .map_err(|e| ApiError::InvalidInput(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);
    let now = Utc::now();
    if (now - ts).abs() > HMAC_WINDOW {
        return Err(ApiError::Unauthorized("timestamp outside allowed window".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Unauthorized(format!("bad hmac key: {e}")))?;
    mac.update(api_key_header.as_bytes());
    mac.update(timestamp_header.as_bytes());
    mac.update(body);

    let expected = hex::decode(signature_header).map_err(|e| ApiError::InvalidInput(format!("bad signature hex: {e}")))?;
    mac.verify_slice(&expected)
        .map_err(|_| ApiError::Unauthorized("HMAC mismatch".to_string()))
}

/// Parse the configured relay private key, accepting either bech32
/// (`nsec1...`) or 64-char hex.
pub fn parse_private_key(raw: &str) -> ApiResult<[u8; 32]> {
    if raw.starts_with("nsec1") {
        let (hrp, data, _variant) = bech32::decode(raw)
            .map_err(|e| ApiError::InvalidInput(format!("bad bech32 key: {e}")))?;
        if hrp != "nsec" {
            return Err(ApiError::InvalidInput(format!("unexpected bech32 hrp: {hrp}")));
        }
        let bytes: Vec<u8> = Vec::<u8>::from_base32(&data)
            .map_err(|e| ApiError::InvalidInput(format!("bad bech32 payload: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| ApiError::InvalidInput("nsec payload must be 32 bytes".to_string()))
    } else {
        let bytes = hex::decode(raw).map_err(|e| ApiError::InvalidInput(format!("bad hex key: {e}")))?;
        bytes.try_into().map_err(|_| ApiError::InvalidInput("private key must be 32 bytes".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_roundtrips() {
        let (token, _exp) = issue_jwt("secret", "pub1").unwrap();
        let claims = verify_jwt("secret", &token).unwrap();
        assert_eq!(claims.user_id, "pub1");
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let (token, _exp) = issue_jwt("secret", "pub1").unwrap();
        assert!(verify_jwt("other", &token).is_err());
    }

    #[test]
    fn hex_private_key_parses() {
        let hex_key = "0".repeat(64);
        let parsed = parse_private_key(&hex_key).unwrap();
        assert_eq!(parsed, [0u8; 32]);
    }
}
