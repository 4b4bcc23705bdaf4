use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::DecodingKey;
use openssl::hash::MessageDigest;
use openssl::x509::X509;

/// Validates an `x5c` certificate chain as presented in a JWS header (Apple
/// App Store Server Notifications V2, spec §4.2): each certificate's
/// signature verified against the next, and the final (root) certificate's
/// SHA-256 fingerprint checked against a pinned allowlist supplied by the
/// caller. Returns a `DecodingKey` built from the leaf certificate's public
/// key on success.
///
/// Apple rotates intermediate certificates but the root stays stable, so
/// pinning the root (rather than the leaf or intermediate) is what the
/// App Store Server Library itself does.
pub fn verify_x5c_chain(x5c: &[String], pinned_root_fingerprints: &[String]) -> Result<DecodingKey> {
    if x5c.is_empty() {
        bail!("x5c chain is empty");
    }

    let certs = x5c
        .iter()
        .map(|b64| {
            let der = STANDARD.decode(b64).context("x5c entry is not valid base64")?;
            X509::from_der(&der).context("x5c entry is not a valid DER certificate")
        })
        .collect::<Result<Vec<_>>>()?;

    // Each certificate (except the root) must be signed by the next one up the chain.
    for pair in certs.windows(2) {
        let (subject, issuer) = (&pair[0], &pair[1]);
        let issuer_pubkey = issuer.public_key().context("issuer certificate has no usable public key")?;
        let verified = subject
            .verify(&issuer_pubkey)
            .context("failed evaluating certificate signature")?;
        if !verified {
            bail!("x5c chain link failed signature verification");
        }
    }

    let root = certs.last().expect("checked non-empty above");
    let root_fingerprint = root
        .digest(MessageDigest::sha256())
        .context("failed to compute root certificate fingerprint")?;
    let root_fingerprint_hex = hex::encode(root_fingerprint);

    if !pinned_root_fingerprints
        .iter()
        .any(|pinned| pinned.eq_ignore_ascii_case(&root_fingerprint_hex))
    {
        bail!("x5c root certificate is not in the pinned allowlist (got {root_fingerprint_hex})");
    }

    let leaf = certs.first().expect("checked non-empty above");
    let leaf_pubkey = leaf.public_key().context("leaf certificate has no usable public key")?;
    let leaf_pubkey_der = leaf_pubkey.public_key_to_der().context("failed to encode leaf public key")?;

    DecodingKey::from_ec_der(&leaf_pubkey_der)
        .map_err(|e| anyhow!("leaf public key is not a usable EC key: {e}"))
}
