use crate::AuthState;
use crate::client::CallbackParams;
use crate::errors::{CatcherMessage, FlowError, error_body};
use crate::flow::Initiation;
use crate::session::Session;
use rocket::http::{CookieJar, Status};
use rocket::http::uri::Origin;
use rocket::response::Redirect;
use rocket::serde::json::{Json, Value};
use rocket::{Catcher, Request, Responder, Route, State, catch, catchers, get, routes};
use tracing::debug;

#[derive(Responder)]
pub enum Initiated {
    Authenticated(&'static str),
    Redirect(Redirect),
}

/// Protected root: "OK" for an authenticated session, otherwise a 302 to the provider.
#[get("/")]
pub async fn index(
    session: Session,
    cookies: &CookieJar<'_>,
    auth_state: &State<AuthState>,
    uri: &Origin<'_>,
) -> Result<Initiated, FlowError> {
    match auth_state.initiate(&session, uri.to_string()).await? {
        Initiation::Authenticated => Ok(Initiated::Authenticated("OK")),
        Initiation::Redirect(url) => {
            // the pending attempt is stored, so the id is now worth keeping
            session.issue_cookie(cookies, &auth_state.cookie);
            Ok(Initiated::Redirect(Redirect::found(url.to_string())))
        }
    }
}

/// Redirect uri registered with the provider.
#[get("/cb?<params..>")]
pub async fn callback(
    session: Session,
    auth_state: &State<AuthState>,
    params: CallbackParams,
) -> Result<&'static str, FlowError> {
    auth_state.complete(&session, &params).await?;
    Ok("OK")
}

/// Every other failure is reported as `{"err": {"message": ...}}`.
#[catch(default)]
pub fn default_catcher(status: Status, req: &Request<'_>) -> (Status, Json<Value>) {
    let CatcherMessage(message) =
        req.local_cache(|| CatcherMessage(status.reason_lossy().to_string()));
    debug!(status = status.code, path = %req.uri(), "request caught");
    (status, error_body(message))
}

pub fn get_routes() -> Vec<Route> {
    routes![index, callback]
}

pub fn get_catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}
