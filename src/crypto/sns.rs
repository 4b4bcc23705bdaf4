use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Verifier;
use openssl::x509::X509;
use url::Url;

/// Fields of an Amazon SNS envelope relevant to signature verification, in
/// the shape Amazon Appstore RTN delivers them (spec §4.2's Amazon inbound
/// notifications arrive wrapped in an SNS `Notification` message).
pub struct SnsEnvelope<'a> {
    pub message_type: &'a str,
    pub message: &'a str,
    pub message_id: &'a str,
    pub subject: Option<&'a str>,
    pub timestamp: &'a str,
    pub topic_arn: &'a str,
    pub signing_cert_url: &'a str,
    pub signature: &'a str,
}

/// Only fetch signing certificates from Amazon-owned SNS hosts, never an
/// attacker-supplied URL baked into the envelope.
pub fn signing_cert_host_is_trusted(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .map(|host| host.ends_with(".amazonaws.com"))
        .unwrap_or(false)
}

/// Builds the newline-joined "string to sign" per Amazon's SNS signature
/// spec. Field order and presence differ between `Notification` and
/// `SubscriptionConfirmation`/`UnsubscribeConfirmation` message types; only
/// `Notification` is needed for receiving Appstore RTNs.
fn build_string_to_sign(envelope: &SnsEnvelope) -> String {
    let mut parts = vec![
        ("Message", envelope.message),
        ("MessageId", envelope.message_id),
    ];
    if let Some(subject) = envelope.subject {
        parts.push(("Subject", subject));
    }
    parts.push(("Timestamp", envelope.timestamp));
    parts.push(("TopicArn", envelope.topic_arn));
    parts.push(("Type", envelope.message_type));

    let mut out = String::new();
    for (key, value) in parts {
        out.push_str(key);
        out.push('\n');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Verifies an SNS envelope's signature using the certificate fetched from
/// `signing_cert_url`. Amazon signs with RSA-SHA1 (SignatureVersion 1).
pub async fn verify_sns_signature(envelope: &SnsEnvelope<'_>, http: &reqwest::Client) -> Result<()> {
    if !signing_cert_host_is_trusted(envelope.signing_cert_url) {
        bail!(
            "refusing to fetch SNS signing certificate from untrusted host: {}",
            envelope.signing_cert_url
        );
    }

    let cert_pem = http
        .get(envelope.signing_cert_url)
        .send()
        .await
        .context("failed to fetch SNS signing certificate")?
        .text()
        .await
        .context("failed to read SNS signing certificate body")?;

    let cert = X509::from_pem(cert_pem.as_bytes()).context("SNS signing certificate is not valid PEM")?;
    let public_key = cert.public_key().context("SNS signing certificate has no usable public key")?;

    let signature = STANDARD
        .decode(envelope.signature)
        .context("SNS Signature field is not valid base64")?;

    let string_to_sign = build_string_to_sign(envelope);

    verify_rsa_sha1(&public_key, string_to_sign.as_bytes(), &signature)
}

fn verify_rsa_sha1(public_key: &PKey<openssl::pkey::Public>, message: &[u8], signature: &[u8]) -> Result<()> {
    let mut verifier =
        Verifier::new(MessageDigest::sha1(), public_key).context("failed to initialize RSA-SHA1 verifier")?;
    verifier.update(message).context("failed to feed message into verifier")?;
    let ok = verifier.verify(signature).context("RSA-SHA1 verification error")?;
    if !ok {
        return Err(anyhow!("SNS signature does not match"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_host_is_rejected() {
        assert!(!signing_cert_host_is_trusted("https://evil.example.com/cert.pem"));
        assert!(signing_cert_host_is_trusted(
            "https://sns.us-east-1.amazonaws.com/SimpleNotificationService-abc.pem"
        ));
    }

    #[test]
    fn string_to_sign_orders_fields_correctly() {
        let envelope = SnsEnvelope {
            message_type: "Notification",
            message: "body",
            message_id: "id-1",
            subject: None,
            timestamp: "2024-01-01T00:00:00Z",
            topic_arn: "arn:aws:sns:us-east-1:1:topic",
            signing_cert_url: "https://sns.us-east-1.amazonaws.com/cert.pem",
            signature: "sig",
        };
        let sts = build_string_to_sign(&envelope);
        assert_eq!(
            sts,
            "Message\nbody\nMessageId\nid-1\nTimestamp\n2024-01-01T00:00:00Z\nTopicArn\narn:aws:sns:us-east-1:1:topic\nType\nNotification\n"
        );
    }
}
