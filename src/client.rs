//! The OpenID Connect protocol side of the relying party.
//!
//! [`IdentityProvider`] is the narrow interface the authorization flow talks
//! to: build an authorization request, and redeem a callback against the
//! attempt stored in the session. [`OIDCClient`] implements it on top of the
//! `openidconnect` crate, which owns PKCE, token endpoint negotiation and id
//! token validation.

use crate::config::RelyingPartyConfig;
use crate::errors::{FlowError, SetupError};
use crate::session::PendingAttempt;
use crate::token::TokenSet;
use openidconnect::core::{
    CoreClient, CoreJsonWebKeySet, CoreJwsSigningAlgorithm, CoreProviderMetadata,
    CoreResponseType,
};
use openidconnect::url::Url;
use openidconnect::{
    AuthUrl, AuthenticationFlow, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, IssuerUrl, JsonWebKeySetUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use openidconnect::reqwest;
use rocket::FromForm;
use tracing::{debug, info, warn};

/// Client with authorization and token endpoints known up front.
pub type OpenIDClient = CoreClient<
    EndpointSet,    // HasAuthUrl
    EndpointNotSet, // HasDeviceAuthUrl
    EndpointNotSet, // HasIntrospectionUrl
    EndpointNotSet, // HasRevocationUrl
    EndpointSet,    // HasTokenUrl
    EndpointNotSet, // HasUserInfoUrl
>;

/// Provider endpoints in use, resolved statically or through discovery.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

/// A freshly generated authorization request and the secrets bound to it.
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: CsrfToken,
    pub code_verifier: PkceCodeVerifier,
    pub nonce: Nonce,
}

impl AuthorizationRequest {
    /// Splits the request into the browser redirect and the attempt kept server side.
    pub fn into_attempt(self, original_url: String) -> (Url, PendingAttempt) {
        let attempt = PendingAttempt {
            state: self.state.secret().to_string(),
            code_verifier: self.code_verifier.secret().to_string(),
            nonce: self.nonce.secret().to_string(),
            original_url,
        };
        (self.url, attempt)
    }
}

/// Query parameters the provider sends back to the redirect uri.
#[derive(Debug, Clone, Default, FromForm)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Checks the provider response against the pending attempt and yields the code to redeem.
    pub fn authorization_code(&self, expected_state: &str) -> Result<AuthorizationCode, FlowError> {
        let state = self
            .state
            .as_deref()
            .ok_or(FlowError::MissingParameter("state"))?;
        if state != expected_state {
            return Err(FlowError::StateMismatch);
        }

        if let Some(error) = &self.error {
            let message = match &self.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            return Err(FlowError::ProviderDenied(message));
        }

        match self.code.as_deref() {
            Some(code) if !code.is_empty() => Ok(AuthorizationCode::new(code.to_string())),
            _ => Err(FlowError::MissingParameter("code")),
        }
    }
}

/// Protocol capabilities the authorization flow depends on.
#[rocket::async_trait]
pub trait IdentityProvider: Send + Sync {
    fn endpoints(&self) -> &ProviderEndpoints;

    /// New `state`, PKCE pair (S256) and `nonce`, plus the url to send the browser to.
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Redeems the callback for a validated token set.
    ///
    /// Fails unless the returned state equals `attempt.state`, the provider
    /// accepts `attempt.code_verifier`, and the id token carries `attempt.nonce`.
    async fn exchange(
        &self,
        callback: &CallbackParams,
        attempt: &PendingAttempt,
    ) -> Result<TokenSet, FlowError>;
}

/// A high-level OpenID Connect (OIDC) client for the authorization code flow with PKCE.
///
/// Internally, `OIDCClient` combines:
/// - An OpenID Connect client (`OpenIDClient`)
/// - A reqwest HTTP client (`reqwest::Client`) for the back channel
/// - The id token signing algorithms this relying party accepts
#[derive(Debug, Clone)]
pub struct OIDCClient {
    client: OpenIDClient,

    // The reqwest HTTP client used for discovery, JWKS and token requests.
    reqwest_client: reqwest::Client,

    endpoints: ProviderEndpoints,
    scopes: Vec<Scope>,
    id_token_algs: Vec<CoreJwsSigningAlgorithm>,
}

impl OIDCClient {
    /// Creates a new `OIDCClient` from static endpoints, or from discovered provider
    /// metadata when no endpoints are configured.
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed, discovery fails, the JWKS
    /// endpoint cannot be fetched, or the HTTP client cannot be built.
    pub async fn from_config(config: &RelyingPartyConfig) -> Result<Self, SetupError> {
        let id_token_algs = config.signing_algorithms()?;

        let reqwest_client = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF vulnerabilities.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .build()?;

        let issuer_url = IssuerUrl::new(config.issuer_url.clone())?;

        let (auth_url, token_url, jwks) =
            match (&config.authorization_endpoint, &config.token_endpoint) {
                (Some(authorization), Some(token)) => {
                    let jwks = match &config.jwks_uri {
                        Some(jwks_uri) => {
                            let jwks_url = JsonWebKeySetUrl::new(jwks_uri.clone())?;
                            CoreJsonWebKeySet::fetch_async(&jwks_url, &reqwest_client).await?
                        }
                        None => CoreJsonWebKeySet::new(Vec::new()),
                    };
                    (
                        AuthUrl::new(authorization.clone())?,
                        TokenUrl::new(token.clone())?,
                        jwks,
                    )
                }
                (None, None) => {
                    if config.jwks_uri.is_some() {
                        warn!("ignoring configured jwks uri, the discovered one takes precedence");
                    }
                    debug!(issuer = %config.issuer_url, "discovering provider metadata");
                    let provider_metadata =
                        CoreProviderMetadata::discover_async(issuer_url.clone(), &reqwest_client)
                            .await?;
                    let token_url = provider_metadata
                        .token_endpoint()
                        .cloned()
                        .ok_or(SetupError::MissingTokenEndpoint)?;
                    (
                        provider_metadata.authorization_endpoint().clone(),
                        token_url,
                        provider_metadata.jwks().clone(),
                    )
                }
                _ => return Err(SetupError::PartialEndpoints),
            };

        let endpoints = ProviderEndpoints {
            issuer: config.issuer_url.clone(),
            authorization_endpoint: auth_url.url().to_string(),
            token_endpoint: token_url.url().to_string(),
        };

        let client = CoreClient::new(
            ClientId::new(config.client_id.clone()),
            issuer_url,
            jwks,
        )
        .set_client_secret(ClientSecret::new(config.client_secret.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone())?);

        info!(
            issuer = %endpoints.issuer,
            authorization_endpoint = %endpoints.authorization_endpoint,
            token_endpoint = %endpoints.token_endpoint,
            "OIDC client configured"
        );

        Ok(Self {
            client,
            reqwest_client,
            endpoints,
            scopes: config.scopes(),
            id_token_algs,
        })
    }
}

#[rocket::async_trait]
impl IdentityProvider for OIDCClient {
    fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn authorization_request(&self) -> AuthorizationRequest {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let request = self.client.authorize_url(
            AuthenticationFlow::<CoreResponseType>::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        let (url, state, nonce) = self
            .scopes
            .iter()
            .cloned()
            .fold(request, |request, scope| request.add_scope(scope))
            .set_pkce_challenge(pkce_challenge)
            .url();

        AuthorizationRequest {
            url,
            state,
            code_verifier: pkce_verifier,
            nonce,
        }
    }

    async fn exchange(
        &self,
        callback: &CallbackParams,
        attempt: &PendingAttempt,
    ) -> Result<TokenSet, FlowError> {
        let code = callback.authorization_code(&attempt.state)?;

        let token_response = self
            .client
            .exchange_code(code)
            .set_pkce_verifier(PkceCodeVerifier::new(attempt.code_verifier.clone()))
            .request_async(&self.reqwest_client)
            .await?;

        let id_token = token_response
            .id_token()
            .ok_or(FlowError::MissingIdToken)?;
        let verifier = self
            .client
            .id_token_verifier()
            .set_allowed_algs(self.id_token_algs.iter().cloned());
        let nonce = Nonce::new(attempt.nonce.clone());
        let claims = id_token.claims(&verifier, &nonce)?;

        Ok(TokenSet::from_response(
            &token_response,
            id_token,
            claims.subject(),
        ))
    }
}
