use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct ServiceAccountAssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: usize,
    exp: usize,
}

/// Builds the RS256 JWT assertion used in Google's service-account OAuth2
/// flow (spec §4.2's Google outbound calls): exchanged for a bearer token
/// via the `urn:ietf:params:oauth:grant-type:jwt-bearer` grant at
/// `https://oauth2.googleapis.com/token`.
pub fn sign_service_account_assertion(
    service_account_email: &str,
    private_key_pem: &str,
    scope: &str,
) -> Result<String> {
    let header = Header::new(jsonwebtoken::Algorithm::RS256);

    let now = Utc::now();
    let claims = ServiceAccountAssertionClaims {
        iss: service_account_email.to_owned(),
        scope: scope.to_owned(),
        aud: "https://oauth2.googleapis.com/token".to_owned(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::minutes(55)).timestamp() as usize,
    };

    let encoding_key =
        EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).context("invalid Google service account key PEM")?;

    encode(&header, &claims, &encoding_key).map_err(|e| anyhow!("failed to sign Google service account assertion: {e}"))
}
