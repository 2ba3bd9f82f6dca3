//! Signed bearer tokens.
//!
//! Tokens use the JWT compact form with HMAC-SHA256 (`HS256`):
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(HMAC-SHA256(key, header "." claims))
//! ```
//!
//! Encoding and signature checks go through `jsonwebtoken`. The header
//! carries a `kid` naming the key that signed the token, so keys can be
//! rotated: the active key signs, retired keys still verify.
//!
//! Verification is stateless. There is no revocation list; keep TTLs short.
//!
//! # Example
//!
//! ```rust
//! use image_pipeline::auth::{Scope, SigningKeys, TokenService};
//! use std::time::Duration;
//!
//! let keys = SigningKeys::new("k1", "0123456789abcdef0123456789abcdef").unwrap();
//! let service = TokenService::new(keys);
//!
//! let issued = service.issue("alice", &[Scope::Read], Duration::from_secs(600)).unwrap();
//! let claims = service.verify(&issued.token).unwrap();
//! assert_eq!(claims.sub, "alice");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::scope::Scope;
use crate::error::{AuthError, SigningError};
use crate::unix_now;

/// Minimum key length in bytes for HMAC-SHA256.
pub const MIN_KEY_LEN: usize = 32;

/// Key id used when none is configured.
pub const DEFAULT_KEY_ID: &str = "default";

/// Default token lifetime (1 hour).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Upper bound on accepted token length.
const MAX_TOKEN_LEN: usize = 8 * 1024;

const ALGORITHM: Algorithm = Algorithm::HS256;

// =============================================================================
// Signing Keys
// =============================================================================

/// Signing key material: one active key plus retired keys accepted for
/// verification only.
#[derive(Clone)]
pub struct SigningKeys {
    active: String,
    keys: HashMap<String, Vec<u8>>,
}

impl SigningKeys {
    /// Create a key set with a single active key.
    pub fn new(kid: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, SigningError> {
        let kid = kid.into();
        let secret = checked_secret(&kid, secret.as_ref())?;

        let mut keys = HashMap::new();
        keys.insert(kid.clone(), secret);
        Ok(Self { active: kid, keys })
    }

    /// Add a key that still verifies tokens but no longer signs them.
    pub fn with_retired_key(
        mut self,
        kid: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self, SigningError> {
        let kid = kid.into();
        let secret = checked_secret(&kid, secret.as_ref())?;
        self.keys.entry(kid).or_insert(secret);
        Ok(self)
    }

    /// Make a new key active. The previous active key is retired.
    pub fn rotate(
        mut self,
        kid: impl Into<String>,
        secret: impl AsRef<[u8]>,
    ) -> Result<Self, SigningError> {
        let kid = kid.into();
        let secret = checked_secret(&kid, secret.as_ref())?;
        self.keys.insert(kid.clone(), secret);
        self.active = kid;
        Ok(self)
    }

    /// Id of the key currently used for signing.
    pub fn active_key_id(&self) -> &str {
        &self.active
    }

    /// Whether a key id is known.
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    fn key(&self, kid: &str) -> Option<&[u8]> {
        self.keys.get(kid).map(|k| k.as_slice())
    }
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&String> = self.keys.keys().collect();
        kids.sort();
        f.debug_struct("SigningKeys")
            .field("active", &self.active)
            .field("kids", &kids)
            .finish()
    }
}

fn checked_secret(kid: &str, secret: &[u8]) -> Result<Vec<u8>, SigningError> {
    if secret.len() < MIN_KEY_LEN {
        return Err(SigningError::KeyTooShort {
            kid: kid.to_string(),
            len: secret.len(),
            min: MIN_KEY_LEN,
        });
    }
    Ok(secret.to_vec())
}

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (asset owner id)
    pub sub: String,

    /// Issued-at (Unix seconds)
    pub iat: u64,

    /// Expiry (Unix seconds)
    pub exp: u64,

    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

/// A freshly issued token together with the claims it encodes.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

// =============================================================================
// Token Service
// =============================================================================

/// Issues and verifies signed tokens.
#[derive(Clone, Debug)]
pub struct TokenService {
    keys: Arc<SigningKeys>,
}

impl TokenService {
    pub fn new(keys: SigningKeys) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    /// The key set backing this service.
    pub fn keys(&self) -> &SigningKeys {
        &self.keys
    }

    /// Issue a token valid for `ttl` from now.
    pub fn issue(
        &self,
        subject: &str,
        scopes: &[Scope],
        ttl: Duration,
    ) -> Result<IssuedToken, SigningError> {
        self.issue_at(subject, scopes, ttl, unix_now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        subject: &str,
        scopes: &[Scope],
        ttl: Duration,
        now: u64,
    ) -> Result<IssuedToken, SigningError> {
        let kid = self.keys.active_key_id();
        let key = self
            .keys
            .key(kid)
            .ok_or_else(|| SigningError::KeyUnavailable(kid.to_string()))?;

        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(ttl.as_secs()),
            scopes: scopes.to_vec(),
        };

        let mut header = Header::new(ALGORITHM);
        header.kid = Some(kid.to_string());

        let token = encode(&header, &claims, &EncodingKey::from_secret(key))
            .map_err(|e| SigningError::Encode(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// Expiry is checked before the signature: an expired token is reported
    /// as `Expired` whether or not its signature is valid.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, AuthError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(AuthError::Malformed("token too long".to_string()));
        }

        let header = decode_header(token).map_err(malformed)?;
        if header.alg != ALGORITHM {
            return Err(AuthError::Malformed(format!(
                "unsupported algorithm '{:?}'",
                header.alg
            )));
        }

        // Unverified read of the claims, only to report expiry first
        let mut unverified = validation();
        unverified.insecure_disable_signature_validation();
        let claims = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &unverified)
            .map_err(malformed)?
            .claims;

        if claims.sub.is_empty() {
            return Err(AuthError::Malformed("empty subject".to_string()));
        }
        if now > claims.exp {
            return Err(AuthError::Expired {
                expired_at: claims.exp,
                current_time: now,
            });
        }

        let key = header
            .kid
            .as_deref()
            .and_then(|kid| self.keys.key(kid))
            .ok_or(AuthError::BadSignature)?;

        decode::<Claims>(token, &DecodingKey::from_secret(key), &validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                _ => malformed(e),
            })
    }
}

/// HS256 validation with expiry left to [`TokenService::verify_at`], which
/// checks it against an injectable clock.
fn validation() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation
}

fn malformed(e: JwtError) -> AuthError {
    AuthError::Malformed(e.to_string())
}

// =============================================================================
// Tests
// =============================================================================
