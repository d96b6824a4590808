use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

use flock_api::QueryError;

/// Shared-secret check.
///
/// Accepts `X-API-Key: <token>` or `Authorization: Basic <base64(token)>`.
/// The decoded Basic credential is compared as a whole, not split into
/// `user:password`. Without a token every request passes.
#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    token: Option<String>,
}

impl AuthGate {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        }
    }

    pub fn enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), QueryError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(());
        };

        if headers
            .get("x-api-key")
            .is_some_and(|key| key.as_bytes() == token.as_bytes())
        {
            return Ok(());
        }

        let basic = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.as_bytes().strip_prefix(b"Basic "))
            .and_then(decode_base64);
        if basic.is_some_and(|decoded| decoded == token.as_bytes()) {
            return Ok(());
        }

        Err(QueryError::auth("Unauthorized"))
    }
}

fn decode_base64(encoded: &[u8]) -> Option<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .or_else(|_| STANDARD_NO_PAD.decode(encoded))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn no_token_allows_everything() {
        assert!(AuthGate::new(None).check(&HeaderMap::new()).is_ok());
        assert!(AuthGate::new(Some("")).check(&HeaderMap::new()).is_ok());
        assert!(!AuthGate::new(Some("")).enabled());
    }

    #[test]
    fn api_key_must_match_exactly() {
        let gate = AuthGate::new(Some("s3cr3t"));
        assert!(gate.check(&headers(&[("x-api-key", "s3cr3t")])).is_ok());
        assert!(gate.check(&headers(&[("x-api-key", "s3cr3t ")])).is_err());
        assert!(gate.check(&headers(&[("x-api-key", "S3CR3T")])).is_err());
    }

    #[test]
    fn basic_compares_whole_decoded_credential() {
        let gate = AuthGate::new(Some("s3cr3t"));
        let ok = format!("Basic {}", STANDARD.encode("s3cr3t"));
        assert!(gate.check(&headers(&[("authorization", &ok)])).is_ok());

        let user_pass = format!("Basic {}", STANDARD.encode("user:s3cr3t"));
        assert!(gate.check(&headers(&[("authorization", &user_pass)])).is_err());

        let bearer = "Bearer s3cr3t";
        assert!(gate.check(&headers(&[("authorization", bearer)])).is_err());
    }

    #[test]
    fn missing_padding_is_tolerated() {
        let gate = AuthGate::new(Some("ab"));
        assert!(gate.check(&headers(&[("authorization", "Basic YWI")])).is_ok());
    }

    #[test]
    fn rejection_is_auth_kind() {
        let err = AuthGate::new(Some("s3cr3t")).check(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.kind(), flock_api::ErrorKind::Auth);
        assert_eq!(err.message(), "Unauthorized");
    }
}
