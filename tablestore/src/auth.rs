//! Credentials and request signing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::request::Action;
use crate::{Result, TableStoreError};

/// Access credentials. Construction trims whitespace and screens against
/// header injection; the id and secret must be non-empty after trimming.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub(crate) access_key_id: String,
    pub(crate) access_key_secret: String,
    pub(crate) sts_token: Option<String>,
}

fn invalid(what: &str) -> TableStoreError {
    TableStoreError::InvalidCredentials(what.to_string())
}

fn screen(value: &str, what: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.contains('\r') || trimmed.contains('\n') {
        return Err(invalid(what));
    }
    Ok(trimmed.to_string())
}

impl Credentials {
    pub fn new(access_key_id: impl AsRef<str>, access_key_secret: impl AsRef<str>) -> Result<Self> {
        let access_key_id = screen(access_key_id.as_ref(), "access key id")?;
        let access_key_secret = screen(access_key_secret.as_ref(), "access key secret")?;
        if access_key_id.is_empty() {
            return Err(invalid("access key id"));
        }
        if access_key_secret.is_empty() {
            return Err(invalid("access key secret"));
        }
        Ok(Credentials {
            access_key_id,
            access_key_secret,
            sts_token: None,
        })
    }

    /// Adds a temporary-credential STS token, sent as `x-ots-ststoken`.
    pub fn with_sts_token(mut self, sts_token: impl AsRef<str>) -> Result<Self> {
        let token = screen(sts_token.as_ref(), "sts token")?;
        self.sts_token = (!token.is_empty()).then_some(token);
        Ok(self)
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

/// The canonical string: `"/Action\nMETHOD\n\n"` followed by every
/// `x-ots-` header as `name:value\n`, in ascending header-name order.
pub(crate) fn canonical_string(
    action: Action,
    method: &str,
    headers: &[(String, String)],
) -> String {
    let mut ots_headers: Vec<&(String, String)> = headers
        .iter()
        .filter(|(name, _)| name.starts_with("x-ots-"))
        .collect();
    ots_headers.sort_by(|a, b| a.0.cmp(&b.0));

    let mut plain = format!("/{}\n{}\n\n", action.name(), method);
    for (name, value) in ots_headers {
        plain.push_str(name);
        plain.push(':');
        plain.push_str(value);
        plain.push('\n');
    }
    plain
}

/// HMAC-SHA1 over the canonical string, base64-encoded. Pure in (secret,
/// action, method, x-ots-* headers).
pub(crate) fn sign_request(
    secret: &str,
    action: Action,
    method: &str,
    headers: &[(String, String)],
) -> String {
    let plain = canonical_string(action, method, headers);
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(plain.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<(String, String)> {
        // Deliberately out of order; the canonical form sorts by name.
        [
            ("x-ots-date", "d"),
            ("x-ots-accesskeyid", "id"),
            ("UserAgent", "ua"),
            ("x-ots-sdk-traceid", "t"),
            ("x-ots-apiversion", "2015-12-31"),
            ("x-ots-instancename", "i"),
            ("x-ots-contentmd5", "m"),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
    }

    #[test]
    fn canonical_string_sorts_ots_headers() {
        let plain = canonical_string(Action::GetRow, "POST", &headers());
        assert_eq!(
            plain,
            "/GetRow\nPOST\n\n\
             x-ots-accesskeyid:id\n\
             x-ots-apiversion:2015-12-31\n\
             x-ots-contentmd5:m\n\
             x-ots-date:d\n\
             x-ots-instancename:i\n\
             x-ots-sdk-traceid:t\n"
        );
    }

    #[test]
    fn signature_is_deterministic_and_header_order_free() {
        let signature = sign_request("secret", Action::GetRow, "POST", &headers());
        let mut reordered = headers();
        reordered.reverse();
        assert_eq!(
            signature,
            sign_request("secret", Action::GetRow, "POST", &reordered)
        );

        // And a fixed input always signs to the same base64 output.
        assert_eq!(
            signature,
            sign_request("secret", Action::GetRow, "POST", &headers())
        );
    }

    #[test]
    fn signature_depends_on_inputs() {
        let base = sign_request("secret", Action::GetRow, "POST", &headers());
        assert_ne!(
            base,
            sign_request("other", Action::GetRow, "POST", &headers())
        );
        assert_ne!(
            base,
            sign_request("secret", Action::PutRow, "POST", &headers())
        );
        let mut changed = headers();
        changed[0].1 = "d2".to_string();
        assert_ne!(base, sign_request("secret", Action::GetRow, "POST", &changed));
    }

    #[test]
    fn non_ots_headers_are_ignored_by_the_signature() {
        let with_extra = {
            let mut h = headers();
            h.push(("Content-Length".to_string(), "12".to_string()));
            h
        };
        assert_eq!(
            sign_request("secret", Action::GetRow, "POST", &headers()),
            sign_request("secret", Action::GetRow, "POST", &with_extra)
        );
    }

    #[test]
    fn credentials_trim_and_screen() {
        let credentials = Credentials::new("  id  ", "\tsecret\n").unwrap();
        assert_eq!(credentials.access_key_id(), "id");
        assert_eq!(credentials.access_key_secret, "secret");

        assert!(Credentials::new("", "secret").is_err());
        assert!(Credentials::new("id", "   ").is_err());
        assert!(Credentials::new("i\rd", "secret").is_err());
        assert!(Credentials::new("id", "secret")
            .unwrap()
            .with_sts_token("tok\nen")
            .is_err());
    }
}
