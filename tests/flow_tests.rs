use openidconnect::core::CoreErrorResponseType;
use openidconnect::url::Url;
use openidconnect::{CsrfToken, Nonce, PkceCodeVerifier, RequestTokenError, StandardErrorResponse};
use rocket::http::{Cookie, SameSite, Status};
use rocket::local::asynchronous::Client;
use rocket_oidc_rp::AuthState;
use rocket_oidc_rp::client::{
    AuthorizationRequest, CallbackParams, IdentityProvider, ProviderEndpoints,
};
use rocket_oidc_rp::errors::FlowError;
use rocket_oidc_rp::session::{
    MemoryStore, PendingAttempt, SESSION_COOKIE, SessionCookie, SessionId, SessionRecord,
    SessionStore, StoreError,
};
use rocket_oidc_rp::token::TokenSet;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;

/// Provider double handing out numbered secrets: attempt `n` uses
/// `state-n`, `verifier-n` and `nonce-n`, and only `code-for-nonce-n` redeems it.
struct StubProvider {
    issued: AtomicUsize,
    endpoints: ProviderEndpoints,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self {
            issued: AtomicUsize::new(0),
            endpoints: ProviderEndpoints {
                issuer: "https://idp.test".to_string(),
                authorization_endpoint: "https://idp.test/authorize".to_string(),
                token_endpoint: "https://idp.test/token".to_string(),
            },
        }
    }
}

impl StubProvider {
    fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[rocket::async_trait]
impl IdentityProvider for StubProvider {
    fn endpoints(&self) -> &ProviderEndpoints {
        &self.endpoints
    }

    fn authorization_request(&self) -> AuthorizationRequest {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let state = format!("state-{n}");

        let mut url = Url::parse(&self.endpoints.authorization_endpoint).unwrap();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("state", &state)
            .append_pair("code_challenge", &format!("challenge-{n}"))
            .append_pair("code_challenge_method", "S256");

        AuthorizationRequest {
            url,
            state: CsrfToken::new(state),
            code_verifier: PkceCodeVerifier::new(format!("verifier-{n}")),
            nonce: Nonce::new(format!("nonce-{n}")),
        }
    }

    async fn exchange(
        &self,
        callback: &CallbackParams,
        attempt: &PendingAttempt,
    ) -> Result<TokenSet, FlowError> {
        let code = callback.authorization_code(&attempt.state)?;
        if *code.secret() != format!("code-for-{}", attempt.nonce) {
            return Err(FlowError::TokenRequest(RequestTokenError::ServerResponse(
                StandardErrorResponse::new(CoreErrorResponseType::InvalidGrant, None, None),
            )));
        }

        Ok(TokenSet {
            id_token: "header.payload.signature".to_string(),
            access_token: "access".to_string(),
            refresh_token: None,
            scopes: None,
            subject: "user-1".to_string(),
            issued_at: OffsetDateTime::now_utc(),
            expires_at: None,
        })
    }
}

struct FailingStore;

#[rocket::async_trait]
impl SessionStore for FailingStore {
    async fn load(&self, _id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Err(StoreError::Unavailable("down".to_string()))
    }

    async fn save(&self, _id: &SessionId, _record: SessionRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("down".to_string()))
    }
}

struct Harness {
    client: Client,
    provider: Arc<StubProvider>,
    store: MemoryStore,
}

impl Harness {
    async fn new() -> Self {
        let provider = Arc::new(StubProvider::default());
        let store = MemoryStore::default();
        let auth_state = AuthState::new(
            provider.clone(),
            Arc::new(store.clone()),
            SessionCookie::default(),
        );
        let client = Client::tracked(rocket_oidc_rp::mount(rocket::build(), auth_state))
            .await
            .unwrap();
        Self {
            client,
            provider,
            store,
        }
    }

    fn session_cookie(&self) -> Option<String> {
        self.client
            .cookies()
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
    }

    fn session_id(&self) -> SessionId {
        SessionId::from(self.session_cookie().expect("session cookie"))
    }

    async fn record(&self) -> Option<SessionRecord> {
        self.store.load(&self.session_id()).await.unwrap()
    }

    async fn get(&self, uri: &str) -> (Status, String) {
        let response = self.client.get(uri).dispatch().await;
        let status = response.status();
        (status, response.into_string().await.unwrap_or_default())
    }
}

fn message(body: &str) -> String {
    let value: Value = serde_json::from_str(body).unwrap();
    value["err"]["message"].as_str().unwrap().to_string()
}

#[rocket::async_test]
async fn root_redirects_to_provider_and_sets_session_cookie() {
    let harness = Harness::new().await;

    let response = harness.client.get("/").dispatch().await;
    assert_eq!(response.status(), Status::Found);

    let location = response.headers().get_one("Location").unwrap();
    assert!(location.starts_with("https://idp.test/authorize?"));
    assert!(location.contains("state=state-1"));
    assert!(location.contains("code_challenge=challenge-1"));
    assert!(!location.contains("verifier-1"));

    let cookie = response.cookies().get(SESSION_COOKIE).unwrap();
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    assert!(cookie.value().len() >= 43);
}

#[rocket::async_test]
async fn initiation_stores_the_pending_attempt() {
    let harness = Harness::new().await;
    harness.get("/").await;

    let record = harness.record().await.unwrap();
    let attempt = record.pending().unwrap();
    assert_eq!(attempt.state, "state-1");
    assert_eq!(attempt.code_verifier, "verifier-1");
    assert_eq!(attempt.nonce, "nonce-1");
    assert_eq!(attempt.original_url, "/");
}

#[rocket::async_test]
async fn callback_without_attempt_is_forbidden() {
    let harness = Harness::new().await;

    let (status, body) = harness.get("/cb?code=abc&state=xyz").await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body, "NG");
    // nothing was stored, so no session id is handed out
    assert!(harness.session_cookie().is_none());
    assert_eq!(harness.provider.issued(), 0);

    let (status, _) = harness.get("/").await;
    assert_eq!(status, Status::Found);
    assert!(harness.session_cookie().is_some());
}

#[rocket::async_test]
async fn completed_flow_authenticates_the_session() {
    let harness = Harness::new().await;
    harness.get("/").await;
    let session = harness.session_cookie();

    let (status, body) = harness.get("/cb?code=code-for-nonce-1&state=state-1").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body, "OK");

    let record = harness.record().await.unwrap();
    assert_eq!(record.token_set().unwrap().subject, "user-1");

    let (status, body) = harness.get("/").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body, "OK");
    assert_eq!(harness.provider.issued(), 1);
    assert_eq!(harness.session_cookie(), session);
}

#[rocket::async_test]
async fn callback_on_authenticated_session_is_forbidden() {
    let harness = Harness::new().await;
    harness.get("/").await;
    harness.get("/cb?code=code-for-nonce-1&state=state-1").await;

    let (status, body) = harness.get("/cb?code=code-for-nonce-1&state=state-1").await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body, "NG");
    assert!(harness.record().await.unwrap().token_set().is_some());
}

#[rocket::async_test]
async fn state_mismatch_is_rejected_and_attempt_kept() {
    let harness = Harness::new().await;
    harness.get("/").await;

    let (status, body) = harness.get("/cb?code=code-for-nonce-1&state=forged").await;
    assert_eq!(status, Status::Unauthorized);
    assert!(message(&body).contains("state"));

    let record = harness.record().await.unwrap();
    assert_eq!(record.pending().unwrap().state, "state-1");
}

#[rocket::async_test]
async fn newer_attempt_supersedes_older_one() {
    let harness = Harness::new().await;
    harness.get("/").await;
    harness.get("/").await;
    assert_eq!(harness.provider.issued(), 2);

    let (status, _) = harness.get("/cb?code=code-for-nonce-1&state=state-1").await;
    assert_eq!(status, Status::Unauthorized);

    let (status, body) = harness.get("/cb?code=code-for-nonce-2&state=state-2").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body, "OK");
}

#[rocket::async_test]
async fn code_from_another_attempt_is_rejected() {
    let harness = Harness::new().await;
    harness.get("/").await;

    let (status, body) = harness.get("/cb?code=code-for-nonce-7&state=state-1").await;
    assert_eq!(status, Status::Unauthorized);
    assert!(message(&body).contains("invalid_grant"));
    assert!(harness.record().await.unwrap().pending().is_some());
}

#[rocket::async_test]
async fn provider_error_is_reported() {
    let harness = Harness::new().await;
    harness.get("/").await;

    let (status, body) = harness
        .get("/cb?state=state-1&error=access_denied&error_description=denied")
        .await;
    assert_eq!(status, Status::Unauthorized);
    assert!(message(&body).contains("access_denied"));
}

#[rocket::async_test]
async fn missing_code_is_a_bad_request() {
    let harness = Harness::new().await;
    harness.get("/").await;

    let (status, body) = harness.get("/cb?state=state-1").await;
    assert_eq!(status, Status::BadRequest);
    assert!(message(&body).contains("code"));
}

#[rocket::async_test]
async fn extra_callback_parameters_are_ignored() {
    let harness = Harness::new().await;
    harness.get("/").await;

    let (status, _) = harness
        .get("/cb?code=code-for-nonce-1&state=state-1&session_state=abc&iss=https%3A%2F%2Fidp.test")
        .await;
    assert_eq!(status, Status::Ok);
}

#[rocket::async_test]
async fn unknown_session_cookie_is_replaced() {
    let harness = Harness::new().await;

    let response = harness
        .client
        .get("/")
        .cookie(Cookie::new(SESSION_COOKIE, "not-a-session"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Found);

    let cookie = response.cookies().get(SESSION_COOKIE).unwrap();
    assert_ne!(cookie.value(), "not-a-session");
}

#[rocket::async_test]
async fn unavailable_store_is_an_internal_error() {
    let auth_state = AuthState::new(
        Arc::new(StubProvider::default()),
        Arc::new(FailingStore),
        SessionCookie::default(),
    );
    let client = Client::tracked(rocket_oidc_rp::mount(rocket::build(), auth_state))
        .await
        .unwrap();

    // saving the new attempt fails
    let response = client.get("/").dispatch().await;
    assert_eq!(response.status(), Status::InternalServerError);
    assert!(response.cookies().get(SESSION_COOKIE).is_none());
    let body = response.into_string().await.unwrap();
    assert!(message(&body).contains("down"));

    // loading an existing session fails inside the request guard
    let response = client
        .get("/")
        .cookie(Cookie::new(SESSION_COOKIE, "existing"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::InternalServerError);
    let body = response.into_string().await.unwrap();
    assert_eq!(message(&body), "session backend unavailable: down");
}

#[rocket::async_test]
async fn unknown_route_gets_json_error() {
    let harness = Harness::new().await;

    let (status, body) = harness.get("/nope").await;
    assert_eq!(status, Status::NotFound);
    assert_eq!(message(&body), "Not Found");
}
