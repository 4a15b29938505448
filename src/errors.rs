use crate::session::StoreError;
use openidconnect::core::CoreErrorResponseType;
use openidconnect::{
    ClaimsVerificationError, DiscoveryError, HttpClientError, RequestTokenError,
    StandardErrorResponse,
};
use rocket::Request;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::{Json, Value, json};
use thiserror::Error;
use tracing::{error, warn};

pub type TokenErr = RequestTokenError<
    HttpClientError<reqwest::Error>,
    StandardErrorResponse<CoreErrorResponseType>,
>;

/// Errors that stop the relying party from starting.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("missing client id")]
    MissingClientId,
    #[error("missing client secret")]
    MissingClientSecret,
    #[error("missing issuer url")]
    MissingIssuerUrl,
    #[error("authorization and token endpoints must be configured together")]
    PartialEndpoints,
    #[error("provider metadata does not advertise a token endpoint")]
    MissingTokenEndpoint,
    #[error("unsupported id token signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("static endpoints need a jwks uri to verify {0} id tokens")]
    MissingJwksUri(String),
    #[error("url parsing error: {0}")]
    UrlErr(#[from] openidconnect::url::ParseError),
    #[error("reqwest error: {0}")]
    RequestErr(#[from] reqwest::Error),
    #[error("discovery error: {0}")]
    OIDCDiscoveryErr(#[from] DiscoveryError<HttpClientError<reqwest::Error>>),
}

/// Errors raised while handling a browser request.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no authorization attempt is pending for this session")]
    Forbidden,
    #[error("missing callback parameter: {0}")]
    MissingParameter(&'static str),
    #[error("returned state does not match the pending authorization attempt")]
    StateMismatch,
    #[error("authorization denied by provider: {0}")]
    ProviderDenied(String),
    #[error("token response did not include an id token")]
    MissingIdToken,
    #[error("id token validation failed: {0}")]
    ClaimsVerification(#[from] ClaimsVerificationError),
    #[error("token request failed: {}", describe_token_error(.0))]
    TokenRequest(#[from] TokenErr),
    #[error("session store error: {0}")]
    Session(#[from] StoreError),
}

fn describe_token_error(err: &TokenErr) -> String {
    match err {
        RequestTokenError::ServerResponse(response) => match response.error_description() {
            Some(description) => format!("{}: {}", response.error().as_ref(), description),
            None => response.error().as_ref().to_string(),
        },
        other => {
            let mut message = other.to_string();
            let mut source = std::error::Error::source(other);
            while let Some(err) = source {
                message.push_str(": ");
                message.push_str(&err.to_string());
                source = err.source();
            }
            message
        }
    }
}

/// Walks the source chain looking for a reqwest timeout.
fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<reqwest::Error>() {
            if err.is_timeout() {
                return true;
            }
        }
        if let Some(err) = err.downcast_ref::<Box<reqwest::Error>>() {
            if err.is_timeout() {
                return true;
            }
        }
        source = err.source();
    }
    false
}

impl FlowError {
    pub fn status(&self) -> Status {
        match self {
            FlowError::Forbidden => Status::Forbidden,
            FlowError::MissingParameter(_) => Status::BadRequest,
            FlowError::StateMismatch
            | FlowError::ProviderDenied(_)
            | FlowError::MissingIdToken
            | FlowError::ClaimsVerification(_) => Status::Unauthorized,
            // the provider refused the code, e.g. invalid_grant or a failed PKCE check
            FlowError::TokenRequest(RequestTokenError::ServerResponse(_)) => Status::Unauthorized,
            FlowError::TokenRequest(err) if is_timeout(err) => Status::GatewayTimeout,
            FlowError::TokenRequest(_) => Status::BadGateway,
            FlowError::Session(_) => Status::InternalServerError,
        }
    }
}

/// Message handed from a failing request guard to the catcher.
#[derive(Debug, Clone)]
pub struct CatcherMessage(pub String);

pub fn error_body(message: &str) -> Json<Value> {
    Json(json!({ "err": { "message": message } }))
}

impl<'r> Responder<'r, 'static> for FlowError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if let FlowError::Forbidden = self {
            warn!(path = %request.uri(), "callback without a pending authorization attempt");
            return (status, "NG").respond_to(request);
        }

        let message = self.to_string();
        if status.code >= 500 {
            error!(status = status.code, %message, "request failed");
        } else {
            warn!(status = status.code, %message, "request rejected");
        }
        (status, error_body(&message)).respond_to(request)
    }
}
