use openidconnect::core::{CoreIdToken, CoreTokenResponse};
use openidconnect::{OAuth2TokenResponse, SubjectIdentifier};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Tokens issued by a successful code exchange, kept server side in the session.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Compact serialization of the validated identity token.
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Option<Vec<String>>,
    /// `sub` claim of the validated identity token.
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl TokenSet {
    pub(crate) fn from_response(
        response: &CoreTokenResponse,
        id_token: &CoreIdToken,
        subject: &SubjectIdentifier,
    ) -> Self {
        let issued_at = OffsetDateTime::now_utc();
        Self {
            id_token: id_token.to_string(),
            access_token: response.access_token().secret().to_string(),
            refresh_token: response
                .refresh_token()
                .map(|token| token.secret().to_string()),
            scopes: response
                .scopes()
                .map(|scopes| scopes.iter().map(|scope| scope.as_str().to_owned()).collect()),
            subject: subject.as_str().to_owned(),
            issued_at,
            expires_at: response.expires_in().map(|expires_in| issued_at + expires_in),
        }
    }

    /// Whether the access token has passed its advertised lifetime.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= OffsetDateTime::now_utc())
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("id_token", &"[redacted]")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("scopes", &self.scopes)
            .field("subject", &self.subject)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
