use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Verifier;
use openssl::x509::X509;
use std::collections::BTreeMap;

/// PHP's `serialize()` applied to the alphabetically-sorted, string-only
/// form of a webhook's fields (Paddle's classic signature scheme): every
/// value is serialized as a PHP string regardless of its JSON type, and the
/// `p_signature` field itself is excluded before signing.
///
/// `fields` must already have `p_signature` removed and be in the exact
/// string form Paddle sent (Paddle signs before any type coercion).
pub fn php_serialize_sorted(fields: &BTreeMap<String, String>) -> String {
    let mut out = format!("a:{}:{{", fields.len());
    for (key, value) in fields {
        out.push_str(&php_serialize_string(key));
        out.push_str(&php_serialize_string(value));
    }
    out.push('}');
    out
}

fn php_serialize_string(s: &str) -> String {
    format!("s:{}:\"{}\";", s.len(), s)
}

/// Verifies Paddle's `p_signature`: base64-decoded RSA-SHA1 signature over
/// the PHP-serialized field map, checked against the tenant's Paddle public
/// key.
pub fn verify_paddle_signature(
    fields: &BTreeMap<String, String>,
    signature_base64: &str,
    public_key_pem: &str,
) -> Result<()> {
    let serialized = php_serialize_sorted(fields);
    let signature = STANDARD
        .decode(signature_base64)
        .context("p_signature is not valid base64")?;

    let public_key = load_public_key(public_key_pem)?;

    let mut verifier =
        Verifier::new(MessageDigest::sha1(), &public_key).context("failed to initialize RSA-SHA1 verifier")?;
    verifier
        .update(serialized.as_bytes())
        .context("failed to feed serialized payload into verifier")?;
    let ok = verifier.verify(&signature).context("RSA-SHA1 verification error")?;
    if !ok {
        return Err(anyhow!("Paddle signature does not match"));
    }
    Ok(())
}

fn load_public_key(pem: &str) -> Result<PKey<openssl::pkey::Public>> {
    if let Ok(pkey) = PKey::public_key_from_pem(pem.as_bytes()) {
        return Ok(pkey);
    }
    // Paddle's dashboard distributes the key wrapped in an X.509 certificate
    // for some account types; fall back to extracting it from that form.
    let cert = X509::from_pem(pem.as_bytes()).context("Paddle public key is neither a PEM public key nor a certificate")?;
    cert.public_key().context("Paddle certificate has no usable public key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_fields_in_sorted_order() {
        let mut fields = BTreeMap::new();
        fields.insert("alert_name".to_string(), "subscription_created".to_string());
        fields.insert("subscription_id".to_string(), "123".to_string());

        let serialized = php_serialize_sorted(&fields);
        assert_eq!(
            serialized,
            "a:2:{s:10:\"alert_name\";s:20:\"subscription_created\";s:15:\"subscription_id\";s:3:\"123\";}"
        );
    }
}
