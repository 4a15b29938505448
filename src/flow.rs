use crate::AuthState;
use crate::client::CallbackParams;
use crate::errors::FlowError;
use crate::session::{Session, SessionRecord};
use openidconnect::url::Url;
use tracing::{debug, info};

/// Outcome of visiting the protected root.
#[derive(Debug)]
pub enum Initiation {
    /// The session already holds a token set.
    Authenticated,
    /// Send the browser to the provider's authorization endpoint.
    Redirect(Url),
}

impl AuthState {
    /// Starts an authorization attempt unless the session is already authenticated.
    ///
    /// A new attempt replaces any earlier pending one, so only the most recent
    /// redirect can be completed.
    pub async fn initiate(
        &self,
        session: &Session,
        original_url: String,
    ) -> Result<Initiation, FlowError> {
        if let Some(tokens) = session.record().token_set() {
            debug!(
                subject = %tokens.subject,
                expired = tokens.is_expired(),
                "session already authenticated"
            );
            return Ok(Initiation::Authenticated);
        }

        let (url, attempt) = self
            .provider
            .authorization_request()
            .into_attempt(original_url);
        self.sessions
            .save(session.id(), SessionRecord::Pending(attempt))
            .await?;

        debug!("authorization attempt started");
        Ok(Initiation::Redirect(url))
    }

    /// Redeems the provider callback for the session's pending attempt.
    ///
    /// The record is only replaced once the exchange succeeds; a failed
    /// callback leaves the pending attempt in place.
    pub async fn complete(
        &self,
        session: &Session,
        callback: &CallbackParams,
    ) -> Result<(), FlowError> {
        let attempt = session.record().pending().ok_or(FlowError::Forbidden)?;

        let tokens = self.provider.exchange(callback, attempt).await?;
        info!(
            subject = %tokens.subject,
            expires_at = ?tokens.expires_at,
            "authorization code exchanged"
        );

        self.sessions
            .save(session.id(), SessionRecord::Complete(tokens))
            .await?;
        Ok(())
    }
}
