use crate::errors::SetupError;
use openidconnect::core::CoreJwsSigningAlgorithm;
use openidconnect::{IssuerUrl, RedirectUrl, Scope};
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// Static configuration of the relying party.
///
/// When neither `authorization_endpoint` nor `token_endpoint` is set the
/// provider is located through OIDC discovery on `issuer_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingPartyConfig {
    pub issuer_url: String,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    /// Keys for id token signatures when endpoints are configured statically.
    pub jwks_uri: Option<String>,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Registered redirect uri, i.e. where `/cb` is reachable.
    pub redirect_url: String,
    pub port: u16,
    /// Scopes requested in addition to `openid`.
    pub scopes: Vec<String>,
    /// JWS algorithms accepted on id tokens, e.g. `RS256`.
    pub id_token_algs: Vec<String>,
    pub session_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub cookie_secure: bool,
}

/// please note this is just an example for local development,
/// client credentials still have to be supplied.
impl Default for RelyingPartyConfig {
    fn default() -> Self {
        Self {
            issuer_url: "http://localhost:8080/realms/master".to_string(),
            authorization_endpoint: None,
            token_endpoint: None,
            jwks_uri: None,
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: "http://localhost:3000/cb".to_string(),
            port: 3000,
            scopes: Vec::new(),
            id_token_algs: vec!["RS256".to_string()],
            session_ttl_secs: 3600,
            request_timeout_secs: 10,
            cookie_secure: false,
        }
    }
}

impl RelyingPartyConfig {
    /// Rejects configurations the server must not start with.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.client_id.is_empty() {
            return Err(SetupError::MissingClientId);
        }
        if self.client_secret.is_empty() {
            return Err(SetupError::MissingClientSecret);
        }
        if self.issuer_url.is_empty() {
            return Err(SetupError::MissingIssuerUrl);
        }
        if self.authorization_endpoint.is_some() != self.token_endpoint.is_some() {
            return Err(SetupError::PartialEndpoints);
        }
        IssuerUrl::new(self.issuer_url.clone())?;
        RedirectUrl::new(self.redirect_url.clone())?;

        let algs = self.signing_algorithms()?;
        // without keys only the client secret can verify, i.e. HS* signatures
        if self.authorization_endpoint.is_some() && self.jwks_uri.is_none() {
            if let Some((name, _)) = self
                .id_token_algs
                .iter()
                .zip(&algs)
                .find(|(_, alg)| !is_hmac(alg))
            {
                return Err(SetupError::MissingJwksUri(name.clone()));
            }
        }
        Ok(())
    }

    pub fn signing_algorithms(&self) -> Result<Vec<CoreJwsSigningAlgorithm>, SetupError> {
        if self.id_token_algs.is_empty() {
            return Err(SetupError::UnsupportedAlgorithm(String::new()));
        }
        self.id_token_algs
            .iter()
            .map(|alg| {
                // unsigned id tokens are never acceptable
                if alg.eq_ignore_ascii_case("none") {
                    return Err(SetupError::UnsupportedAlgorithm(alg.clone()));
                }
                serde_json::from_value(serde_json::Value::String(alg.clone()))
                    .map_err(|_| SetupError::UnsupportedAlgorithm(alg.clone()))
            })
            .collect()
    }

    /// Extra scopes; `openid` itself is always requested by the client.
    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes
            .iter()
            .map(|scope| scope.trim())
            .filter(|scope| !scope.is_empty() && *scope != "openid")
            .map(|scope| Scope::new(scope.to_string()))
            .collect()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn is_hmac(alg: &CoreJwsSigningAlgorithm) -> bool {
    matches!(
        alg,
        CoreJwsSigningAlgorithm::HmacSha256
            | CoreJwsSigningAlgorithm::HmacSha384
            | CoreJwsSigningAlgorithm::HmacSha512
    )
}
