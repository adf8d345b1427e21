use base64::Engine;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Tokens issued by the identity provider for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Tokens {
    /// Tokens consisting of a bare, non-expiring access token.
    pub fn from_access_token(value: impl Into<String>) -> Self {
        Self {
            access_token: AccessToken::new(value),
            id_token: None,
            refresh_token: None,
            scopes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Sets the expiry relative to `issued_at`, as reported by `expires_in`.
    /// `None` when the expiry is not a representable date.
    pub fn expiring_in(
        mut self,
        issued_at: DateTime<Utc>,
        expires_in_secs: i64,
    ) -> Option<Self> {
        let lifetime = TimeDelta::try_seconds(expires_in_secs)?;
        self.expires_at = Some(issued_at.checked_add_signed(lifetime)?);
        Some(self)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Raw ID token (a JWT) together with the claims parsed out of it.
///
/// Serialized as the raw JWT string; the claims are re-parsed on load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdToken {
    raw: String,
    claims: IdTokenInfo,
}

impl IdToken {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdTokenInfoError> {
        let raw = raw.into();
        let claims = parse_id_token(&raw)?;
        Ok(Self { raw, claims })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn claims(&self) -> &IdTokenInfo {
        &self.claims
    }
}

impl TryFrom<String> for IdToken {
    type Error = IdTokenInfoError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<IdToken> for String {
    fn from(token: IdToken) -> Self {
        token.raw
    }
}

/// Flat subset of useful claims in an ID token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IdTokenInfo {
    pub subject: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub nonce: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdTokenInfoError {
    #[error("invalid ID token format")]
    InvalidFormat,
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Default, Deserialize)]
struct IdClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    nonce: Option<String>,
}

/// Decodes the claims of an ID token. The signature is not verified here;
/// the token came straight from the token endpoint over TLS.
pub fn parse_id_token(id_token: &str) -> Result<IdTokenInfo, IdTokenInfoError> {
    let payload = jwt_payload(id_token).ok_or(IdTokenInfoError::InvalidFormat)?;
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))?;
    let claims: IdClaims = serde_json::from_slice(&payload)?;
    Ok(IdTokenInfo {
        subject: claims.sub,
        email: claims.email,
        name: claims.name,
        expires_at: claims
            .exp
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
        nonce: claims.nonce,
    })
}

fn jwt_payload(token: &str) -> Option<&str> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let _signature = parts.next()?;
    if parts.next().is_some() || payload.is_empty() {
        return None;
    }
    Some(payload)
}
