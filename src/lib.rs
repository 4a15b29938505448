/*!
A minimal OpenID Connect relying party for [Rocket](https://rocket.rs).

Visiting `/` either answers `OK` for an authenticated session or redirects the
browser to the provider's authorization endpoint with a fresh `state`, `nonce`
and S256 PKCE challenge. The provider sends the browser back to `/cb`, where the
authorization code is redeemed with the stored code verifier and the resulting
tokens are kept in the server side session. The browser only ever holds an
opaque session id cookie.

```rust,no_run
use rocket_oidc_rp::config::RelyingPartyConfig;

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RelyingPartyConfig {
        client_id: "demo".to_string(),
        client_secret: "secret".to_string(),
        ..RelyingPartyConfig::default()
    };

    let rocket = rocket_oidc_rp::setup(rocket::build(), &config).await?;
    let _ = rocket.launch().await?;
    Ok(())
}
```
*/

use std::sync::Arc;

pub mod client;
pub mod config;
pub mod errors;
pub mod flow;
pub mod routes;
pub mod session;
pub mod token;
pub mod utils;

use client::{IdentityProvider, OIDCClient};
use config::RelyingPartyConfig;
use errors::SetupError;
use rocket::{Build, Rocket};
use session::{MemoryStore, SessionCookie, SessionStore};
use tracing::info;

/// Shared state of the relying party, managed by Rocket.
#[derive(Clone)]
pub struct AuthState {
    pub provider: Arc<dyn IdentityProvider>,
    pub sessions: Arc<dyn SessionStore>,
    pub cookie: SessionCookie,
}

impl AuthState {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<dyn SessionStore>,
        cookie: SessionCookie,
    ) -> Self {
        Self {
            provider,
            sessions,
            cookie,
        }
    }
}

/// Builds the provider client and an in-memory session store from `config`.
pub async fn from_config(config: &RelyingPartyConfig) -> Result<AuthState, SetupError> {
    config.validate()?;
    let client = OIDCClient::from_config(config).await?;

    info!(
        redirect_url = %config.redirect_url,
        session_ttl_secs = config.session_ttl_secs,
        "relying party ready"
    );

    Ok(AuthState::new(
        Arc::new(client),
        Arc::new(MemoryStore::new(config.session_ttl())),
        SessionCookie {
            secure: config.cookie_secure,
        },
    ))
}

/// Mounts `/` and `/cb` plus the JSON error catcher on `rocket`.
pub fn mount(rocket: Rocket<Build>, auth_state: AuthState) -> Rocket<Build> {
    rocket
        .manage(auth_state)
        .mount("/", routes::get_routes())
        .register("/", routes::get_catchers())
}

pub async fn setup(
    rocket: Rocket<Build>,
    config: &RelyingPartyConfig,
) -> Result<Rocket<Build>, SetupError> {
    let auth_state = from_config(config).await?;
    Ok(mount(rocket, auth_state))
}
