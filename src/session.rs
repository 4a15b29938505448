//! Server side session records and the store they live in.
//!
//! The browser only ever holds an opaque, unguessable session id in the
//! [`SESSION_COOKIE`] cookie. Everything else (the in-flight authorization
//! attempt, and later the issued tokens) stays in a [`SessionStore`].

use crate::AuthState;
use crate::errors::CatcherMessage;
use crate::token::TokenSet;
use crate::utils::random_token;
use rocket::Request;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, error};

pub const SESSION_COOKIE: &str = "SESSION";

/// Opaque identifier of a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh id with 256 bits of entropy.
    pub fn generate() -> Self {
        Self(random_token(32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transient values bound to one authorization attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAttempt {
    pub state: String,
    pub code_verifier: String,
    pub nonce: String,
    /// Path the browser asked for when the attempt started.
    pub original_url: String,
}

impl fmt::Debug for PendingAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAttempt")
            .field("state", &self.state)
            .field("code_verifier", &"[redacted]")
            .field("nonce", &self.nonce)
            .field("original_url", &self.original_url)
            .finish()
    }
}

/// Where a browser session stands in the authorization code flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionRecord {
    #[default]
    NotStarted,
    Pending(PendingAttempt),
    Complete(TokenSet),
}

impl SessionRecord {
    /// The attempt this session is allowed to complete, if any.
    pub fn pending(&self) -> Option<&PendingAttempt> {
        match self {
            SessionRecord::Pending(attempt) => Some(attempt),
            _ => None,
        }
    }

    pub fn token_set(&self) -> Option<&TokenSet> {
        match self {
            SessionRecord::Complete(tokens) => Some(tokens),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session backend unavailable: {0}")]
    Unavailable(String),
}

/// Key value service holding session records.
///
/// A record saved while handling one request must be returned by `load` for
/// the next request carrying the same id.
#[rocket::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;
    async fn save(&self, id: &SessionId, record: SessionRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    record: SessionRecord,
    expires_at: OffsetDateTime,
}

#[derive(Debug)]
struct Sessions {
    entries: HashMap<SessionId, Entry>,
    last_sweep: OffsetDateTime,
}

/// In-process session store with a rolling time to live.
///
/// Every `load` or `save` of a live record pushes its expiry forward. Expired
/// records are dropped lazily on `load`, and swept from the whole map at most
/// once per TTL on `save`.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    sessions: Arc<RwLock<Sessions>>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Sessions {
                entries: HashMap::new(),
                last_sweep: OffsetDateTime::now_utc(),
            })),
            ttl,
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.sessions.read().await.entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[rocket::async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let entries = &mut sessions.entries;

        let Some(entry) = entries.get_mut(id) else {
            return Ok(None);
        };
        if entry.expires_at <= now {
            entries.remove(id);
            return Ok(None);
        }
        entry.expires_at = now + self.ttl;
        Ok(Some(entry.record.clone()))
    }

    async fn save(&self, id: &SessionId, record: SessionRecord) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;

        // nothing can have expired since the last sweep until a full TTL has passed
        if now >= sessions.last_sweep + self.ttl {
            let before = sessions.entries.len();
            sessions.entries.retain(|_, entry| entry.expires_at > now);
            sessions.last_sweep = now;
            debug!(
                swept = before - sessions.entries.len(),
                "expired sessions removed"
            );
        }

        sessions.entries.insert(
            id.clone(),
            Entry {
                record,
                expires_at: now + self.ttl,
            },
        );
        Ok(())
    }
}

/// Attributes of the session cookie.
#[derive(Debug, Clone, Default)]
pub struct SessionCookie {
    pub secure: bool,
}

impl SessionCookie {
    /// Lax rather than Strict: the callback arrives as a cross-site top level navigation.
    pub fn build(&self, id: &SessionId) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, id.as_str().to_owned()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}

/// Request guard resolving the browser's session.
///
/// Unknown or expired ids are replaced with a freshly generated one. The
/// cookie for a new id is only sent once a record has been saved under it,
/// see [`Session::issue_cookie`].
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    record: SessionRecord,
    is_new: bool,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Hands a newly generated id to the browser; known sessions keep their cookie.
    pub fn issue_cookie(&self, cookies: &CookieJar<'_>, policy: &SessionCookie) {
        if self.is_new {
            cookies.add(policy.build(&self.id));
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Session {
    type Error = StoreError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(auth) = req.rocket().state::<AuthState>() else {
            let err = StoreError::Unavailable("no session store is managed".to_string());
            req.local_cache(|| CatcherMessage(err.to_string()));
            return Outcome::Error((Status::InternalServerError, err));
        };

        let cookies = req.cookies();
        if let Some(cookie) = cookies.get(SESSION_COOKIE) {
            let id = SessionId::from(cookie.value().to_string());
            match auth.sessions.load(&id).await {
                Ok(Some(record)) => {
                    return Outcome::Success(Session {
                        id,
                        record,
                        is_new: false,
                    });
                }
                Ok(None) => debug!("unknown or expired session cookie, issuing a new session"),
                Err(err) => {
                    error!(%err, "failed to load session");
                    req.local_cache(|| CatcherMessage(err.to_string()));
                    return Outcome::Error((Status::InternalServerError, err));
                }
            }
        }

        Outcome::Success(Session {
            id: SessionId::generate(),
            record: SessionRecord::NotStarted,
            is_new: true,
        })
    }
}
