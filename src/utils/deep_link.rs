use anyhow::{bail, Result};
use url::Url;

/// Check that `uri` looks like a pairing URI: `wc:<topic>@<version>?...`
/// carrying a relay protocol and a symmetric key.
pub fn validate_pairing_uri(uri: &str) -> Result<Url> {
    let parsed = Url::parse(uri)?;
    if parsed.scheme() != "wc" {
        bail!("Not a pairing URI (scheme {}): {}", parsed.scheme(), uri);
    }
    if !parsed.path().contains('@') {
        bail!("Pairing URI is missing its version: {}", uri);
    }
    let has = |key: &str| parsed.query_pairs().any(|(k, v)| k == key && !v.is_empty());
    if !has("relay-protocol") || !has("symKey") {
        bail!("Pairing URI is missing relay-protocol or symKey: {}", uri);
    }
    Ok(parsed)
}

/// Deep link that hands the pairing URI to the desktop wallet.
pub fn wallet_deep_link(base: &str, uri: &str) -> Result<String> {
    validate_pairing_uri(uri)?;
    Ok(format!("{}{}", base, uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "wc:7f6e504bfad60b485450578e05678ed3e8e8c4751d3c6160be17160d63ec90f9@2?relay-protocol=irn&symKey=587d5484ce2a2a6ee3ba1962fdd7e8588e06200c46823bd18fbd67def96ad303";

    #[test]
    fn test_accepts_pairing_uri() {
        let parsed = validate_pairing_uri(URI).unwrap();
        assert_eq!(parsed.scheme(), "wc");
        assert_eq!(
            wallet_deep_link("syrius://", URI).unwrap(),
            format!("syrius://{}", URI)
        );
    }

    #[test]
    fn test_rejects_other_uris() {
        assert!(validate_pairing_uri("https://example.com").is_err());
        assert!(validate_pairing_uri("wc:abc@2?relay-protocol=irn").is_err());
        assert!(validate_pairing_uri("wc:abc?relay-protocol=irn&symKey=00").is_err());
        assert!(validate_pairing_uri("not a uri").is_err());
    }
}
