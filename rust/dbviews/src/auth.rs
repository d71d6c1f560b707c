//! Single-credential check: HTTP Basic auth or `user`/`pass` query parameters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::{header, HeaderMap};
use std::collections::HashMap;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }

    /// Accepts the request if either credential source matches.
    pub fn authorize(&self, headers: &HeaderMap, params: &HashMap<String, String>) -> bool {
        if let Some((username, password)) = basic_credentials(headers) {
            if self.matches(&username, &password) {
                return true;
            }
        }

        match (params.get("user"), params.get("pass")) {
            (Some(username), Some(password)) => self.matches(username, password),
            _ => false,
        }
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn basic(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = STANDARD.encode(format!("{user}:{pass}"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {token}")).unwrap(),
        );
        headers
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn accepts_basic_auth() {
        let creds = Credentials::new("laura", "secret");
        assert!(creds.authorize(&basic("laura", "secret"), &HashMap::new()));
        assert!(!creds.authorize(&basic("laura", "wrong"), &HashMap::new()));
    }

    #[test]
    fn accepts_query_parameters() {
        let creds = Credentials::new("laura", "secret");
        let query = params(&[("user", "laura"), ("pass", "secret")]);
        assert!(creds.authorize(&HeaderMap::new(), &query));
        assert!(!creds.authorize(&HeaderMap::new(), &params(&[("user", "laura")])));
    }

    #[test]
    fn falls_back_to_query_when_header_is_wrong() {
        let creds = Credentials::new("laura", "secret");
        let query = params(&[("user", "laura"), ("pass", "secret")]);
        assert!(creds.authorize(&basic("bob", "nope"), &query));
    }

    #[test]
    fn password_may_contain_colons() {
        let creds = Credentials::new("laura", "a:b:c");
        assert!(creds.authorize(&basic("laura", "a:b:c"), &HashMap::new()));
    }

    #[test]
    fn ignores_other_schemes() {
        let creds = Credentials::new("laura", "secret");
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(!creds.authorize(&headers, &HashMap::new()));
        assert_eq!(
            format!("{creds:?}"),
            "Credentials { username: \"laura\", password: \"<redacted>\" }"
        );
    }
}
