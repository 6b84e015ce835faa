use rocket::{
    http::Status,
    serde::json::{json, Json, Value},
    Catcher, Request, Route,
};

mod admin;
pub mod auth;
mod elections;
mod nomination;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(elections::routes());
    routes.extend(nomination::routes());
    routes.extend(admin::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Give errors raised outside our handlers (failed guards, unparseable
/// bodies, unknown routes) the same JSON shape as our own.
#[catch(default)]
fn default_catcher(status: Status, req: &Request) -> (Status, Json<Value>) {
    // Bodies that parse as JSON but don't fit the schema are still bad requests.
    let status = if status == Status::UnprocessableEntity {
        Status::BadRequest
    } else {
        status
    };
    let kind = match status.code {
        400 => "validation",
        401 => "unauthorized",
        403 => "eligibility",
        404 => "not_found",
        409 => "conflict",
        503 => "contention",
        code if code >= 500 => "internal",
        _ => "error",
    };
    debug!("Caught {status} for {} {}", req.method(), req.uri());
    let body = json!({
        "error": kind,
        "message": status.reason().unwrap_or("Unknown error"),
    });
    (status, Json(body))
}
