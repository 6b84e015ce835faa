use rocket::{http::Status, response::status::Custom, serde::json::Json, Route, State};

use crate::engine::{lifecycle::Transition, Engine};
use crate::error::Result;
use crate::model::{
    api::{
        election::{AdminElectionDescription, ElectionSpec},
        pagination::{Paginated, Pagination},
    },
    common::{
        election::{ElectionId, ElectionStatus},
        principal::Principal,
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        elections,
        election,
        create_election,
        modify_election,
        publish,
        pause,
        resume,
        close,
        archive,
        hide,
        unhide,
        anonymize,
    ]
}

/// Every election, including drafts and hidden ones.
#[get("/admin/elections?<status>")]
async fn elections(
    principal: Principal,
    status: Option<ElectionStatus>,
    pagination: Pagination,
    engine: &State<Engine>,
) -> Result<Json<Paginated<AdminElectionDescription>>> {
    let page = engine
        .admin_elections(&principal, status, pagination)
        .await?;
    Ok(Json(page))
}

#[get("/admin/elections/<election_id>")]
async fn election(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    Ok(Json(engine.admin_election(election_id, &principal).await?))
}

#[post("/admin/elections", data = "<spec>", format = "json")]
async fn create_election(
    principal: Principal,
    spec: Json<ElectionSpec>,
    engine: &State<Engine>,
) -> Result<Custom<Json<AdminElectionDescription>>> {
    let election = engine
        .create_election(&principal, spec.into_inner())
        .await?;
    Ok(Custom(Status::Created, Json(election)))
}

/// Replace the definition of a draft.
#[put("/admin/elections/<election_id>", data = "<spec>", format = "json")]
async fn modify_election(
    election_id: ElectionId,
    principal: Principal,
    spec: Json<ElectionSpec>,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    let election = engine
        .modify_election(election_id, &principal, spec.into_inner())
        .await?;
    Ok(Json(election))
}

async fn apply(
    engine: &Engine,
    election_id: ElectionId,
    principal: &Principal,
    transition: Transition,
) -> Result<Json<AdminElectionDescription>> {
    let election = engine
        .transition(election_id, principal, transition)
        .await?;
    Ok(Json(election))
}

#[post("/admin/elections/<election_id>/publish")]
async fn publish(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Publish).await
}

#[post("/admin/elections/<election_id>/pause")]
async fn pause(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Pause).await
}

#[post("/admin/elections/<election_id>/resume")]
async fn resume(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Resume).await
}

#[post("/admin/elections/<election_id>/close")]
async fn close(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Close).await
}

#[post("/admin/elections/<election_id>/archive")]
async fn archive(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Archive).await
}

#[post("/admin/elections/<election_id>/hide")]
async fn hide(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Hide).await
}

#[post("/admin/elections/<election_id>/unhide")]
async fn unhide(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    apply(engine, election_id, &principal, Transition::Unhide).await
}

/// Irreversibly replace member IDs on the election's ballots with pseudonyms.
/// Superadmins only.
#[post("/admin/elections/<election_id>/anonymize")]
async fn anonymize(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    Ok(Json(engine.anonymize(election_id, &principal).await?))
}
