use rocket::{
    http::Status,
    response::status::Custom,
    serde::json::{Error as JsonError, Json},
    Route, State,
};

use crate::engine::{eligibility::Surface, lifecycle::Transition, Engine};
use crate::error::Result;
use crate::model::{
    api::{
        election::{
            AdminElectionDescription, ElectionDescription, ElectionResults, ElectionSummary,
            NominationSpec,
        },
        pagination::{Paginated, Pagination},
        vote::{NominationVoteRequest, VoteReceipt},
    },
    common::{
        election::{ElectionId, ElectionStatus},
        principal::Principal,
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        rounds,
        round,
        vote,
        results,
        create_round,
        open_round,
        close_round,
        next_round,
    ]
}

/// Rounds whose committee the caller sits on.
#[get("/nomination/elections?<status>")]
async fn rounds(
    principal: Principal,
    status: Option<ElectionStatus>,
    pagination: Pagination,
    engine: &State<Engine>,
) -> Result<Json<Paginated<ElectionSummary>>> {
    let page = engine
        .list_elections(&principal, Surface::Nomination, status, pagination)
        .await?;
    Ok(Json(page))
}

#[get("/nomination/elections/<election_id>")]
async fn round(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<ElectionDescription>> {
    let description = engine
        .election_description(election_id, &principal, Surface::Nomination)
        .await?;
    Ok(Json(description))
}

#[post(
    "/nomination/elections/<election_id>/vote",
    data = "<request>",
    format = "json"
)]
async fn vote(
    election_id: ElectionId,
    principal: Principal,
    request: std::result::Result<Json<NominationVoteRequest>, JsonError<'_>>,
    engine: &State<Engine>,
) -> Result<Custom<Json<VoteReceipt>>> {
    let request = request.map_err(|err| {
        engine.reject_submission("nomination_vote", election_id, Some(&principal), err.into())
    })?;
    let receipt = engine
        .submit_nomination_vote(election_id, &principal, request.into_inner())
        .await?;
    Ok(Custom(Status::Created, Json(receipt)))
}

#[get("/nomination/elections/<election_id>/results")]
async fn results(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<ElectionResults>> {
    let results = engine
        .results(election_id, &principal, Surface::Nomination)
        .await?;
    Ok(Json(results))
}

#[post("/nomination/admin/elections", data = "<spec>", format = "json")]
async fn create_round(
    principal: Principal,
    spec: Json<NominationSpec>,
    engine: &State<Engine>,
) -> Result<Custom<Json<AdminElectionDescription>>> {
    let round = engine
        .create_election(&principal, spec.into_inner().into())
        .await?;
    Ok(Custom(Status::Created, Json(round)))
}

#[post("/nomination/admin/elections/<election_id>/open-round")]
async fn open_round(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    let round = engine
        .transition_round(election_id, &principal, Transition::Publish)
        .await?;
    Ok(Json(round))
}

#[post("/nomination/admin/elections/<election_id>/close-round")]
async fn close_round(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<AdminElectionDescription>> {
    let round = engine
        .transition_round(election_id, &principal, Transition::Close)
        .await?;
    Ok(Json(round))
}

/// Start a follow-up draft round from a closed one.
#[post("/nomination/admin/elections/<election_id>/next-round")]
async fn next_round(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Custom<Json<AdminElectionDescription>>> {
    let round = engine.next_round(election_id, &principal).await?;
    Ok(Custom(Status::Created, Json(round)))
}
