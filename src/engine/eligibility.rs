use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::model::{
    api::{
        election::{ElectionDescription, ElectionSummary},
        pagination::{Paginated, Pagination},
    },
    common::{
        election::{ElectionId, ElectionStatus},
        principal::Principal,
    },
    db::Election,
};
use crate::store::ElectionFilter;

use super::Engine;

/// Why an election is not accepting votes right now.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowError {
    #[error("Election is not accepting votes")]
    NotPublished,
    #[error("Voting has not opened yet")]
    NotOpenYet,
    #[error("Voting has closed")]
    AlreadyClosed,
}

/// Outcome of a voting window check.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct WindowCheck {
    pub valid: bool,
    pub error: Option<WindowError>,
}

impl WindowCheck {
    fn open() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn shut(error: WindowError) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> std::result::Result<(), WindowError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Which HTTP surface an election is being reached through. Nomination
/// rounds only exist on the nomination surface and vice versa.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Surface {
    Member,
    Nomination,
}

impl Surface {
    fn serves(self, election: &Election) -> bool {
        election.is_nomination() == (self == Surface::Nomination)
    }
}

/// Is the election accepting ballots at `now`?
pub fn validate_voting_window(election: &Election, now: DateTime<Utc>) -> WindowCheck {
    match election.status {
        ElectionStatus::Published => {}
        ElectionStatus::Closed | ElectionStatus::Archived => {
            return WindowCheck::shut(WindowError::AlreadyClosed)
        }
        ElectionStatus::Draft | ElectionStatus::Paused => {
            return WindowCheck::shut(WindowError::NotPublished)
        }
    }
    if election.scheduled_start.map_or(false, |start| now < start) {
        return WindowCheck::shut(WindowError::NotOpenYet);
    }
    if election.is_dynamically_closed(now) {
        return WindowCheck::shut(WindowError::AlreadyClosed);
    }
    WindowCheck::open()
}

/// Does the election's policy admit the principal? Nomination rounds also
/// require a seat on the committee.
pub fn is_eligible(election: &Election, principal: &Principal) -> bool {
    election.eligibility.admits(principal)
        && (!election.is_nomination() || election.is_committee_member(&principal.uid))
}

/// Unknown, hidden and draft elections, and those on the other surface, do
/// not exist as far as members are concerned.
pub fn ensure_visible(
    election: Option<Election>,
    id: ElectionId,
    surface: Surface,
) -> Result<Election> {
    match election {
        Some(election)
            if !election.hidden
                && election.status != ElectionStatus::Draft
                && surface.serves(&election) =>
        {
            Ok(election)
        }
        _ => Err(Error::not_found(format!("Election {id}"))),
    }
}

pub fn ensure_eligible(election: &Election, principal: &Principal) -> Result<()> {
    if is_eligible(election, principal) {
        Ok(())
    } else if election.is_nomination() {
        Err(Error::Eligibility(
            "Only committee members may access this nomination round".to_string(),
        ))
    } else {
        Err(Error::Eligibility(
            "You are not eligible for this election".to_string(),
        ))
    }
}

impl Engine {
    /// Fetch an election the principal may see through the given surface.
    pub async fn visible_election(
        &self,
        id: ElectionId,
        principal: &Principal,
        surface: Surface,
    ) -> Result<Election> {
        let election = ensure_visible(self.store.election(id).await?, id, surface)?;
        ensure_eligible(&election, principal)?;
        Ok(election)
    }

    pub async fn election_description(
        &self,
        id: ElectionId,
        principal: &Principal,
        surface: Surface,
    ) -> Result<ElectionDescription> {
        let election = self.visible_election(id, principal, surface).await?;
        let has_voted = self
            .store
            .voted_elections(&principal.uid, &[id])
            .await?
            .contains(&id);
        Ok(ElectionDescription::new(election, has_voted))
    }

    /// Elections the principal may take part in, optionally narrowed to one
    /// status. Callers on the nomination surface who sit on no committee are
    /// refused outright.
    pub async fn list_elections(
        &self,
        principal: &Principal,
        surface: Surface,
        status: Option<ElectionStatus>,
        pagination: Pagination,
    ) -> Result<Paginated<ElectionSummary>> {
        let nomination = surface == Surface::Nomination;
        let visible = ElectionFilter {
            nomination: Some(nomination),
            committee_member: nomination.then(|| principal.uid.clone()),
            ..ElectionFilter::member_visible()
        };
        let mut elections = self.store.elections(&visible).await?;
        elections.retain(|election| is_eligible(election, principal));
        if nomination && elections.is_empty() {
            return Err(Error::Eligibility(
                "You are not a member of any nomination committee".to_string(),
            ));
        }

        let filter = visible.with_status(status);
        elections.retain(|election| filter.matches(election));
        let page = pagination.paginate(elections);
        let ids: Vec<ElectionId> = page.items.iter().map(|election| election.id).collect();
        let voted = self.store.voted_elections(&principal.uid, &ids).await?;
        Ok(page.map(|election| {
            let has_voted = voted.contains(&election.id);
            ElectionSummary::new(election, has_voted)
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::engine::testing::Harness;
    use crate::model::{api::vote::VoteRequest, db::election::examples::example_now};

    #[test]
    fn published_inside_window_is_open() {
        let election = Election::single_choice_example(1);
        assert_eq!(validate_voting_window(&election, example_now()), WindowCheck::open());
    }

    #[test]
    fn window_errors_say_why() {
        let now = example_now();
        let election = Election::single_choice_example(1);

        let early = now - Duration::days(2);
        assert_eq!(
            validate_voting_window(&election, early).error,
            Some(WindowError::NotOpenYet)
        );

        let late = now + Duration::days(8);
        assert_eq!(
            validate_voting_window(&election, late).error,
            Some(WindowError::AlreadyClosed)
        );

        let paused = election.clone().with_status(ElectionStatus::Paused);
        assert_eq!(
            validate_voting_window(&paused, now).error,
            Some(WindowError::NotPublished)
        );

        let closed = election.with_status(ElectionStatus::Closed);
        let check = validate_voting_window(&closed, now);
        assert!(!check.valid);
        assert_eq!(check.error, Some(WindowError::AlreadyClosed));
    }

    #[test]
    fn unbounded_windows_stay_open() {
        let mut election = Election::single_choice_example(1);
        election.scheduled_start = None;
        election.scheduled_end = None;
        assert!(validate_voting_window(&election, example_now() + Duration::days(1000)).valid);
    }

    #[test]
    fn hidden_draft_and_unknown_are_not_found() {
        let election = Election::single_choice_example(1);
        assert!(ensure_visible(Some(election.clone()), 1, Surface::Member).is_ok());

        let mut hidden = election.clone();
        hidden.hidden = true;
        assert!(matches!(
            ensure_visible(Some(hidden), 1, Surface::Member),
            Err(Error::NotFound(_))
        ));

        let draft = election.clone().with_status(ElectionStatus::Draft);
        assert!(matches!(
            ensure_visible(Some(draft), 1, Surface::Member),
            Err(Error::NotFound(_))
        ));

        assert!(matches!(
            ensure_visible(None, 1, Surface::Member),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn nominations_live_on_their_own_surface() {
        let nomination = Election::nomination_example(1);
        assert!(ensure_visible(Some(nomination.clone()), 1, Surface::Member).is_err());
        assert!(ensure_visible(Some(nomination), 1, Surface::Nomination).is_ok());
        assert!(ensure_visible(Some(Election::single_choice_example(2)), 2, Surface::Nomination).is_err());
    }

    #[test]
    fn nomination_eligibility_requires_committee_seat() {
        let nomination = Election::nomination_example(1);
        assert!(is_eligible(&nomination, &Principal::member("c1")));
        assert!(!is_eligible(&nomination, &Principal::member("outsider")));
        assert!(matches!(
            ensure_eligible(&nomination, &Principal::member("outsider")),
            Err(Error::Eligibility(_))
        ));
    }

    #[rocket::async_test]
    async fn listing_shows_visible_elections_with_has_voted() {
        let harness = Harness::new();
        harness.insert(Election::single_choice_example(1)).await;
        harness
            .insert(Election::single_choice_example(2).with_status(ElectionStatus::Draft))
            .await;
        harness
            .insert(Election::single_choice_example(3).with_status(ElectionStatus::Closed))
            .await;
        harness.insert(Election::nomination_example(4)).await;
        let member = Principal::member("m1");
        let vote = VoteRequest {
            answer_ids: Some(vec!["A".to_string()]),
            ..Default::default()
        };
        harness.engine.submit_vote(1, &member, vote).await.unwrap();

        let page = harness
            .engine
            .list_elections(&member, Surface::Member, None, Pagination::new(1, 10).unwrap())
            .await
            .unwrap();
        let listed: Vec<_> = page.items.iter().map(|e| (e.id, e.has_voted)).collect();
        assert_eq!(listed, vec![(1, true), (3, false)]);

        let closed = harness
            .engine
            .list_elections(
                &member,
                Surface::Member,
                Some(ElectionStatus::Closed),
                Pagination::new(1, 10).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(closed.items.len(), 1);
        assert_eq!(closed.items[0].id, 3);
    }

    #[rocket::async_test]
    async fn nomination_listing_requires_a_committee_seat() {
        let harness = Harness::new();
        harness.insert(Election::nomination_example(1)).await;
        let page = Pagination::new(1, 10).unwrap();

        let listed = harness
            .engine
            .list_elections(&Principal::member("c2"), Surface::Nomination, None, page)
            .await
            .unwrap();
        assert_eq!(listed.items.len(), 1);

        let refused = harness
            .engine
            .list_elections(&Principal::member("m1"), Surface::Nomination, None, page)
            .await;
        assert!(matches!(refused, Err(Error::Eligibility(_))));
    }
}
