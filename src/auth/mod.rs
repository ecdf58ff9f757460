//! Credentials on outgoing provider requests.
//!
//! Most providers take a bearer token; Gemini expects the key in a
//! dedicated header. Keys are held as [`SecretString`] and never appear in
//! `Debug` output.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

/// Adds credentials to request headers.
pub trait AuthProvider: Send + Sync {
    /// Writes the credential header(s) into `headers`.
    fn apply_auth(&self, headers: &mut HashMap<String, String>);

    /// Short scheme label for logs.
    fn scheme(&self) -> &str;

    /// A fresh header map holding only the credentials.
    fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::with_capacity(1);
        self.apply_auth(&mut headers);
        headers
    }
}

/// Where the key goes on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPlacement {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `<name>: <key>`.
    Header(String),
}

/// A provider API key and its placement.
pub struct ApiKeyAuth {
    placement: KeyPlacement,
    api_key: SecretString,
}

impl ApiKeyAuth {
    /// Sends the key as a bearer token.
    pub fn bearer(api_key: SecretString) -> Self {
        Self {
            placement: KeyPlacement::Bearer,
            api_key,
        }
    }

    /// Sends the key verbatim in `header`.
    pub fn header(header: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            placement: KeyPlacement::Header(header.into()),
            api_key,
        }
    }

    /// How the key is attached.
    pub fn placement(&self) -> &KeyPlacement {
        &self.placement
    }

    /// Last four characters of the key, for diagnostics.
    pub fn key_hint(&self) -> String {
        key_hint(self.api_key.expose_secret())
    }
}

/// `...` plus the last four characters of `key`, or `****` for short keys.
pub(crate) fn key_hint(key: &str) -> String {
    match key.char_indices().rev().nth(3) {
        Some((start, _)) if start > 0 => format!("...{}", &key[start..]),
        _ => "****".to_string(),
    }
}

impl AuthProvider for ApiKeyAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) {
        let secret = self.api_key.expose_secret();
        match &self.placement {
            KeyPlacement::Bearer => {
                headers.insert("Authorization".to_string(), format!("Bearer {secret}"));
            }
            KeyPlacement::Header(name) => {
                headers.insert(name.clone(), secret.clone());
            }
        }
    }

    fn scheme(&self) -> &str {
        match self.placement {
            KeyPlacement::Bearer => "Bearer",
            KeyPlacement::Header(_) => "ApiKeyHeader",
        }
    }
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("placement", &self.placement)
            .field("api_key", &"[REDACTED]")
            .field("key_hint", &self.key_hint())
            .finish()
    }
}
