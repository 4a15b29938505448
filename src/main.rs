use rocket_oidc_rp::config::RelyingPartyConfig;
use rocket_oidc_rp::errors::SetupError;
use rocket_oidc_rp::utils::load_client_secret;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, StructOpt)]
#[structopt(about = "OpenID Connect relying party with PKCE and server side sessions")]
pub struct Args {
    /// Issuer url of the OpenID provider
    #[structopt(long, env = "ISSUER_URL", default_value = "http://localhost:8080/realms/master")]
    issuer_url: String,
    /// Authorization endpoint; skips discovery together with --token-endpoint
    #[structopt(long, env = "AUTHORIZATION_ENDPOINT")]
    authorization_endpoint: Option<String>,
    #[structopt(long, env = "TOKEN_ENDPOINT")]
    token_endpoint: Option<String>,
    /// JWKS used to verify id tokens when endpoints are static
    #[structopt(long, env = "JWKS_URI")]
    jwks_uri: Option<String>,
    #[structopt(long, env = "CLIENT_ID")]
    client_id: String,
    #[structopt(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
    /// Path to a file holding the client secret
    #[structopt(long, env = "CLIENT_SECRET_FILE", parse(from_os_str))]
    client_secret_file: Option<PathBuf>,
    #[structopt(long, env = "REDIRECT_URL", default_value = "http://localhost:3000/cb")]
    redirect_url: String,
    #[structopt(long, env = "PORT", default_value = "3000")]
    port: u16,
    /// Scopes requested in addition to openid
    #[structopt(long, env = "SCOPES", use_delimiter = true)]
    scopes: Vec<String>,
    #[structopt(long, env = "ID_TOKEN_ALGS", use_delimiter = true, default_value = "RS256")]
    id_token_algs: Vec<String>,
    #[structopt(long, env = "SESSION_TTL_SECS", default_value = "3600")]
    session_ttl_secs: u64,
    #[structopt(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    request_timeout_secs: u64,
    /// Mark the session cookie Secure; enable when served over https
    #[structopt(long, env = "COOKIE_SECURE", parse(try_from_str), default_value = "false")]
    cookie_secure: bool,
}

impl Args {
    fn into_config(self) -> Result<RelyingPartyConfig, SetupError> {
        let client_secret = match (self.client_secret, self.client_secret_file) {
            (Some(secret), _) => secret,
            (None, Some(path)) => load_client_secret(path)?,
            (None, None) => return Err(SetupError::MissingClientSecret),
        };

        Ok(RelyingPartyConfig {
            issuer_url: self.issuer_url,
            authorization_endpoint: self.authorization_endpoint,
            token_endpoint: self.token_endpoint,
            jwks_uri: self.jwks_uri,
            client_id: self.client_id,
            client_secret,
            redirect_url: self.redirect_url,
            port: self.port,
            scopes: self.scopes,
            id_token_algs: self.id_token_algs,
            session_ttl_secs: self.session_ttl_secs,
            request_timeout_secs: self.request_timeout_secs,
            cookie_secure: self.cookie_secure,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rocket_oidc_rp=info,rocket=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[rocket::main]
async fn main() {
    init_tracing();

    let config = match Args::from_args().into_config() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            process::exit(1);
        }
    };

    let figment = rocket::Config::figment().merge(("port", config.port));
    let rocket = match rocket_oidc_rp::setup(rocket::custom(figment), &config).await {
        Ok(rocket) => rocket,
        Err(err) => {
            error!(%err, "failed to set up the relying party");
            process::exit(1);
        }
    };

    if let Err(err) = rocket.launch().await {
        error!(%err, "server stopped");
        process::exit(1);
    }
}
