use rocket::{
    http::Status,
    response::status::Custom,
    serde::json::{Error as JsonError, Json},
    Route, State,
};

use crate::engine::{eligibility::Surface, Engine};
use crate::error::Result;
use crate::model::{
    api::{
        election::{ElectionDescription, ElectionResults, ElectionSummary},
        pagination::{Paginated, Pagination},
        vote::{IssuedToken, TokenVoteRequest, VoteReceipt, VoteRequest},
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
        vote,
        results,
        issue_token,
        token_vote
    ]
}

#[get("/elections?<status>")]
async fn elections(
    principal: Principal,
    status: Option<ElectionStatus>,
    pagination: Pagination,
    engine: &State<Engine>,
) -> Result<Json<Paginated<ElectionSummary>>> {
    let page = engine
        .list_elections(&principal, Surface::Member, status, pagination)
        .await?;
    Ok(Json(page))
}

#[get("/elections/<election_id>")]
async fn election(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<ElectionDescription>> {
    let description = engine
        .election_description(election_id, &principal, Surface::Member)
        .await?;
    Ok(Json(description))
}

#[post("/elections/<election_id>/vote", data = "<request>", format = "json")]
async fn vote(
    election_id: ElectionId,
    principal: Principal,
    request: std::result::Result<Json<VoteRequest>, JsonError<'_>>,
    engine: &State<Engine>,
) -> Result<Custom<Json<VoteReceipt>>> {
    let request = request.map_err(|err| {
        engine.reject_submission("vote", election_id, Some(&principal), err.into())
    })?;
    let receipt = engine
        .submit_vote(election_id, &principal, request.into_inner())
        .await?;
    Ok(Custom(Status::Created, Json(receipt)))
}

#[get("/elections/<election_id>/results")]
async fn results(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Json<ElectionResults>> {
    let results = engine
        .results(election_id, &principal, Surface::Member)
        .await?;
    Ok(Json(results))
}

/// Issue the caller's one voting token for this election.
#[post("/elections/<election_id>/token")]
async fn issue_token(
    election_id: ElectionId,
    principal: Principal,
    engine: &State<Engine>,
) -> Result<Custom<Json<IssuedToken>>> {
    let token = engine.issue_token(election_id, &principal).await?;
    Ok(Custom(Status::Created, Json(token)))
}

/// Vote with a previously issued token. Needs no credentials: the token is
/// the only proof of eligibility, so the ballot is not linked to a member.
#[post("/elections/<election_id>/token-vote", data = "<request>", format = "json")]
async fn token_vote(
    election_id: ElectionId,
    request: std::result::Result<Json<TokenVoteRequest>, JsonError<'_>>,
    engine: &State<Engine>,
) -> Result<Custom<Json<VoteReceipt>>> {
    let request = request
        .map_err(|err| engine.reject_submission("token_vote", election_id, None, err.into()))?;
    let receipt = engine
        .submit_token_vote(election_id, request.into_inner())
        .await?;
    Ok(Custom(Status::Created, Json(receipt)))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, Value},
    };

    use super::*;
    use crate::api::testing::{bearer, json_body};
    use crate::engine::testing::Harness;
    use crate::model::db::Election;
    use crate::store::Store;

    async fn insert_elections(harness: &Harness) {
        harness.insert(Election::single_choice_example(1)).await;
        harness
            .insert(Election::ranked_example(2).with_status(ElectionStatus::Draft))
            .await;
        let mut hidden = Election::multi_choice_example(3);
        hidden.hidden = true;
        harness.insert(hidden).await;
        harness.insert(Election::nomination_example(4)).await;
    }

    #[backend_test]
    async fn listing_requires_credentials(client: Client) {
        let response = client.get("/elections").dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());

        let body: Value = json_body(response).await;
        assert_eq!(body["error"], "unauthorized");
    }

    #[backend_test]
    async fn members_see_only_visible_member_elections(client: Client, harness: Harness) {
        insert_elections(&harness).await;

        let response = client
            .get("/elections")
            .header(bearer(&Principal::member("m1")))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let page: Value = json_body(response).await;
        let ids: Vec<u64> = page["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(page["items"][0]["has_voted"], false);
        assert_eq!(page["pagination"]["total"], 1);
    }

    #[backend_test]
    async fn drafts_are_not_found(client: Client, harness: Harness) {
        insert_elections(&harness).await;

        let response = client
            .get(uri!(election(2)))
            .header(bearer(&Principal::member("m1")))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn second_vote_conflicts(client: Client, harness: Harness) {
        insert_elections(&harness).await;
        let member = Principal::member("m1");

        let response = client
            .post(uri!(vote(1)))
            .header(ContentType::JSON)
            .header(bearer(&member))
            .body(json!({"answer_ids": ["A"]}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Created, response.status());
        let receipt: VoteReceipt = json_body(response).await;
        assert_eq!(receipt.ballot_ids.len(), 1);

        let response = client
            .post(uri!(vote(1)))
            .header(ContentType::JSON)
            .header(bearer(&member))
            .body(json!({"answer_ids": ["B"]}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        let body: Value = json_body(response).await;
        assert_eq!(body["error"], "conflict");

        assert_eq!(harness.store.ballots(1).await.unwrap().len(), 1);

        let response = client
            .get(uri!(election(1)))
            .header(bearer(&member))
            .dispatch()
            .await;
        let description: ElectionDescription = json_body(response).await;
        assert!(description.has_voted);
    }

    #[backend_test]
    async fn malformed_ballots_are_bad_requests(client: Client, harness: Harness) {
        insert_elections(&harness).await;
        let member = Principal::member("m1");

        for body in [
            json!({"answer_ids": ["Z"]}),
            json!({"ranked_answers": ["A"]}),
            json!({"answer_ids": ["A"], "unexpected": 1}),
        ] {
            let response = client
                .post(uri!(vote(1)))
                .header(ContentType::JSON)
                .header(bearer(&member))
                .body(body.to_string())
                .dispatch()
                .await;
            assert_eq!(Status::BadRequest, response.status(), "{body}");
        }
        assert!(harness.store.ballots(1).await.unwrap().is_empty());
    }

    #[backend_test]
    async fn unreadable_ballots_are_audited(client: Client, harness: Harness) {
        insert_elections(&harness).await;

        let response = client
            .post(uri!(vote(1)))
            .header(ContentType::JSON)
            .header(bearer(&Principal::member("m1")))
            .body(json!({"answer_idz": ["A"]}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        let body: Value = json_body(response).await;
        assert_eq!(body["error"], "validation");

        let events = harness.audit.events_for("vote");
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert_eq!(events[0].details["uid"], "m1");
        assert_eq!(events[0].details["error"], "validation");

        let response = client
            .post(uri!(token_vote(1)))
            .header(ContentType::JSON)
            .body("{\"token\": 7}")
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        let events = harness.audit.events_for("token_vote");
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
    }

    #[backend_test]
    async fn repeated_rankings_are_rejected_before_lookup(client: Client, harness: Harness) {
        let response = client
            .post(uri!(vote(99)))
            .header(ContentType::JSON)
            .header(bearer(&Principal::member("m1")))
            .body(json!({"ranked_answers": ["A", "A"]}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        assert!(!harness.audit.events_for("vote")[0].success);
    }

    #[backend_test]
    async fn huge_page_numbers_give_an_empty_page(client: Client, harness: Harness) {
        insert_elections(&harness).await;

        let path = format!("/elections?page_num={}", usize::MAX);
        let response = client
            .get(path.as_str())
            .header(bearer(&Principal::member("m1")))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let page: Value = json_body(response).await;
        assert!(page["items"].as_array().unwrap().is_empty());
        assert_eq!(page["pagination"]["total"], 1);
    }

    #[backend_test]
    async fn results_wait_for_the_end(client: Client, harness: Harness) {
        insert_elections(&harness).await;
        for (uid, answer) in [("m1", "A"), ("m2", "A"), ("m3", "B")] {
            let response = client
                .post(uri!(vote(1)))
                .header(ContentType::JSON)
                .header(bearer(&Principal::member(uid)))
                .body(json!({ "answer_ids": [answer] }).to_string())
                .dispatch()
                .await;
            assert_eq!(Status::Created, response.status());
        }

        let member = Principal::member("m1");
        let response = client
            .get(uri!(results(1)))
            .header(bearer(&member))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        harness.clock.advance(Duration::days(8));
        let response = client
            .get(uri!(results(1)))
            .header(bearer(&member))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let results: Value = json_body(response).await;
        assert_eq!(results["winner"], "A");
        assert_eq!(results["answers"][0]["votes"], 2);
        assert_eq!(results["answers"][0]["percentage"], 66.7);
        assert_eq!(results["answers"][1]["percentage"], 33.3);
    }

    #[backend_test]
    async fn token_votes_once_without_credentials(client: Client, harness: Harness) {
        insert_elections(&harness).await;

        let response = client
            .post(uri!(issue_token(1)))
            .header(bearer(&Principal::member("m1")))
            .dispatch()
            .await;
        assert_eq!(Status::Created, response.status());
        let issued: IssuedToken = json_body(response).await;

        let body = json!({"token": issued.token, "answer_ids": ["B"]}).to_string();
        let response = client
            .post(uri!(token_vote(1)))
            .header(ContentType::JSON)
            .body(body.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Created, response.status());

        let response = client
            .post(uri!(token_vote(1)))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let ballots = harness.store.ballots(1).await.unwrap();
        assert_eq!(ballots.len(), 1);
        assert!(ballots[0].member_uid.is_none());
    }
}
