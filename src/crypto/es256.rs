use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct AppStoreApiClaims {
    iss: String,
    iat: usize,
    exp: usize,
    aud: String,
    bid: String,
}

/// Builds a signed ES256 JWT for authenticating against the App Store
/// Server API (spec §4.2's Apple outbound calls). Apple limits these tokens
/// to at most 60 minutes; 10 minutes mirrors the sample token lifetime
/// Apple's own docs use and keeps clock-skew exposure small.
pub fn sign_app_store_api_token(
    key_id: &str,
    issuer_id: &str,
    bundle_id: &str,
    private_key_pem: &str,
) -> Result<String> {
    let mut header = Header::new(jsonwebtoken::Algorithm::ES256);
    header.kid = Some(key_id.to_owned());

    let now = Utc::now();
    let claims = AppStoreApiClaims {
        iss: issuer_id.to_owned(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::minutes(10)).timestamp() as usize,
        aud: "appstoreconnect-v1".to_owned(),
        bid: bundle_id.to_owned(),
    };

    let encoding_key = EncodingKey::from_ec_pem(private_key_pem.as_bytes())
        .context("invalid Apple private key PEM")?;

    encode(&header, &claims, &encoding_key).map_err(|e| anyhow!("failed to sign App Store API token: {e}"))
}
