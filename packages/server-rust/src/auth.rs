//! Caller identity checks for inbound function calls.
//!
//! Three tiers are recognised: app key, hook key and master key. Each check
//! is a pure predicate over the request headers; a tier whose secret is not
//! configured simply never passes.

use std::sync::Arc;

use http::HeaderMap;
use subtle::ConstantTimeEq;

/// Header carrying the application id.
pub const HEADER_ID: &str = "x-lc-id";
/// Header carrying the app key or `<master>,master`.
pub const HEADER_KEY: &str = "x-lc-key";
/// Header carrying `hash,nonce[,master]`.
pub const HEADER_SIGN: &str = "x-lc-sign";
pub const HEADER_HOOK_KEY: &str = "x-lc-hook-key";
pub const HEADER_SESSION: &str = "x-lc-session";

const MASTER_SUFFIX: &str = ",master";

/// Tenant secrets, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    pub app_id: Option<String>,
    pub app_key: Option<String>,
    pub master_key: Option<String>,
    pub hook_key: Option<String>,
}

impl CredentialSet {
    /// Reads `APP_ID`, `APP_KEY`, `APP_MASTER_KEY` and `APP_HOOK_KEY`.
    /// Unset or empty variables leave the secret absent.
    #[must_use]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            app_id: var("APP_ID"),
            app_key: var("APP_KEY"),
            master_key: var("APP_MASTER_KEY"),
            hook_key: var("APP_HOOK_KEY"),
        }
    }
}

/// Identity headers of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialHeaders {
    pub id: Option<String>,
    pub key: Option<String>,
    pub sign: Option<String>,
    pub hook_key: Option<String>,
    pub session: Option<String>,
}

impl CredentialHeaders {
    /// Extracts the identity headers. Empty or non-UTF-8 values are treated
    /// as absent.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };
        Self {
            id: get(HEADER_ID),
            key: get(HEADER_KEY),
            sign: get(HEADER_SIGN),
            hook_key: get(HEADER_HOOK_KEY),
            session: get(HEADER_SESSION),
        }
    }
}

/// Parsed `X-LC-Sign` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureToken {
    pub hash: String,
    pub nonce: String,
    /// The caller claims the master tier (third part is literally `master`).
    pub master: bool,
}

impl SignatureToken {
    /// Returns `None` unless the header has exactly two or three parts.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let parts: Vec<&str> = header.split(',').collect();
        match parts.as_slice() {
            [hash, nonce] => Some(Self {
                hash: (*hash).to_string(),
                nonce: (*nonce).to_string(),
                master: false,
            }),
            [hash, nonce, flag] => Some(Self {
                hash: (*hash).to_string(),
                nonce: (*nonce).to_string(),
                master: *flag == "master",
            }),
            _ => None,
        }
    }
}

/// Outcome of a signature check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureCheck {
    /// The signature claimed the master tier.
    pub master: bool,
    /// The hash matched.
    pub pass: bool,
}

/// Computes the lowercase hex `md5(nonce + secret)` signature.
#[must_use]
pub fn sign(nonce: &str, secret: &str) -> String {
    format!("{:x}", md5::compute(format!("{nonce}{secret}")))
}

fn secure_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn matches(provided: Option<&str>, configured: Option<&str>) -> bool {
    match (provided, configured) {
        (Some(p), Some(c)) => secure_eq(p, c),
        _ => false,
    }
}

/// Evaluates the three trust tiers against a [`CredentialSet`].
#[derive(Debug, Clone)]
pub struct Verifier {
    credentials: Arc<CredentialSet>,
}

impl Verifier {
    #[must_use]
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    fn id_matches(&self, headers: &CredentialHeaders) -> bool {
        matches(headers.id.as_deref(), self.credentials.app_id.as_deref())
    }

    #[must_use]
    pub fn validate_app_key(&self, headers: &CredentialHeaders) -> bool {
        self.id_matches(headers)
            && matches(headers.key.as_deref(), self.credentials.app_key.as_deref())
    }

    /// Accepts `X-LC-Key: <master>` with or without the `,master` suffix.
    #[must_use]
    pub fn validate_master_key(&self, headers: &CredentialHeaders) -> bool {
        let key = headers
            .key
            .as_deref()
            .map(|k| k.strip_suffix(MASTER_SUFFIX).unwrap_or(k));
        self.id_matches(headers) && matches(key, self.credentials.master_key.as_deref())
    }

    #[must_use]
    pub fn validate_hook_key(&self, headers: &CredentialHeaders) -> bool {
        self.id_matches(headers)
            && matches(
                headers.hook_key.as_deref(),
                self.credentials.hook_key.as_deref(),
            )
    }

    /// Checks `X-LC-Sign`. The secret is the master key when the token
    /// claims the master tier, otherwise the app key.
    #[must_use]
    pub fn validate_signature(&self, headers: &CredentialHeaders) -> SignatureCheck {
        if !self.id_matches(headers) {
            return SignatureCheck::default();
        }
        let Some(token) = headers.sign.as_deref().and_then(SignatureToken::parse) else {
            return SignatureCheck::default();
        };
        let secret = if token.master {
            self.credentials.master_key.as_deref()
        } else {
            self.credentials.app_key.as_deref()
        };
        let pass = secret.is_some_and(|secret| secure_eq(&token.hash, &sign(&token.nonce, secret)));
        SignatureCheck {
            master: token.master,
            pass,
        }
    }
}
