//! Election lifecycle: creation, editing of drafts, status transitions and
//! the irreversible anonymization of ballots.
//!
//! Every operation here locks the election it changes and is audited,
//! successful or not.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::audit_details;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        election::{AdminElectionDescription, ElectionSpec},
        pagination::{Paginated, Pagination},
    },
    common::{
        election::{ElectionId, ElectionStatus, MemberUid},
        principal::Principal,
    },
    db::Election,
};
use crate::store::{ElectionFilter, Transaction};

use super::{finish, Engine};

pub type HmacSha256 = Hmac<Sha256>;

/// Prefix of the member IDs written by anonymization.
pub const PSEUDONYM_PREFIX: &str = "anon:";

/// An anonymized election and how many rows were rewritten.
struct Anonymized {
    election: Election,
    ballots: u64,
    registrations: u64,
}

/// An explicit change of an election's status or visibility.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    Publish,
    Pause,
    Resume,
    Close,
    Archive,
    Hide,
    Unhide,
}

impl Transition {
    pub fn action(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Close => "close",
            Self::Archive => "archive",
            Self::Hide => "hide",
            Self::Unhide => "unhide",
        }
    }

    /// Apply the transition, or explain why the election's current status
    /// does not allow it.
    pub fn apply(self, election: &mut Election, now: DateTime<Utc>) -> Result<()> {
        use ElectionStatus::*;

        let next = match (self, election.status) {
            (Self::Publish, Draft) => Published,
            (Self::Pause, Published) => Paused,
            (Self::Resume, Paused) => Published,
            (Self::Close, Published | Paused) => {
                election.closed_at = Some(now);
                Closed
            }
            (Self::Archive, Closed) => Archived,
            (Self::Hide, status) => {
                election.hidden = true;
                status
            }
            (Self::Unhide, status) => {
                election.hidden = false;
                status
            }
            (_, status) => {
                return Err(Error::Conflict(format!(
                    "Cannot {} an election that is {status}",
                    self.action()
                )))
            }
        };
        election.status = next;
        election.updated_at = now;
        Ok(())
    }
}

pub fn ensure_manager(principal: &Principal) -> Result<()> {
    if principal.is_election_manager() {
        Ok(())
    } else {
        Err(Error::Eligibility(
            "This action requires the election manager role".to_string(),
        ))
    }
}

pub fn ensure_superadmin(principal: &Principal) -> Result<()> {
    if principal.is_superadmin() {
        Ok(())
    } else {
        Err(Error::Eligibility(
            "This action requires the superadmin role".to_string(),
        ))
    }
}

/// The one-way replacement for a member ID on an anonymized election.
pub fn pseudonym(key: &str, election_id: ElectionId, member_uid: &str) -> Result<MemberUid> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|err| Error::Internal(format!("Invalid anonymization key: {err}")))?;
    mac.update(election_id.to_string().as_bytes());
    mac.update(b":");
    mac.update(member_uid.as_bytes());
    Ok(format!(
        "{PSEUDONYM_PREFIX}{}",
        HEXLOWER.encode(&mac.finalize().into_bytes())
    ))
}

fn scope_error(id: ElectionId, nomination_only: bool) -> Error {
    if nomination_only {
        Error::not_found(format!("Nomination round {id}"))
    } else {
        Error::not_found(format!("Election {id}"))
    }
}

impl Engine {
    pub async fn create_election(
        &self,
        principal: &Principal,
        spec: ElectionSpec,
    ) -> Result<AdminElectionDescription> {
        let started = Instant::now();
        let mut details = audit_details! {
            "uid" => principal.uid,
            "voting_type" => spec.voting_type.as_str(),
        };
        let result = self.create_election_inner(principal, spec).await;
        if let Ok(election) = &result {
            details.insert("election_id".to_string(), election.id.into());
        }
        self.audit("create_election", started, details, &result);
        result.map(AdminElectionDescription::from)
    }

    async fn create_election_inner(
        &self,
        principal: &Principal,
        spec: ElectionSpec,
    ) -> Result<Election> {
        ensure_manager(principal)?;
        spec.validate()?;
        let mut tx = self.store.begin().await?;
        let result = async {
            let id = tx.next_election_id().await?;
            let election = spec.into_election(id, principal.uid.clone(), self.clock.now());
            tx.insert_election(&election).await?;
            Ok::<_, Error>(election)
        }
        .await;
        finish(tx, result).await
    }

    /// Replace the definition of a draft election.
    pub async fn modify_election(
        &self,
        id: ElectionId,
        principal: &Principal,
        spec: ElectionSpec,
    ) -> Result<AdminElectionDescription> {
        let started = Instant::now();
        let details = audit_details! {
            "uid" => principal.uid,
            "election_id" => id,
        };
        let result = match ensure_manager(principal).and_then(|()| spec.validate()) {
            Ok(()) => {
                let spec = &spec;
                self.retry_on_contention(move || self.attempt_modify(id, spec.clone()))
                    .await
            }
            Err(err) => Err(err),
        };
        self.audit("modify_election", started, details, &result);
        result.map(AdminElectionDescription::from)
    }

    async fn attempt_modify(&self, id: ElectionId, spec: ElectionSpec) -> Result<Election> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut election = tx
                .lock_election(id)
                .await?
                .ok_or_else(|| Error::not_found(format!("Election {id}")))?;
            if election.status != ElectionStatus::Draft {
                return Err(Error::Conflict(format!(
                    "Only draft elections can be modified; this one is {}",
                    election.status
                )));
            }
            spec.apply_to(&mut election, self.clock.now());
            tx.save_election(&election).await?;
            Ok::<_, Error>(election)
        }
        .await;
        finish(tx, result).await
    }

    /// Apply a lifecycle transition to any election.
    pub async fn transition(
        &self,
        id: ElectionId,
        principal: &Principal,
        transition: Transition,
    ) -> Result<AdminElectionDescription> {
        self.transition_audited(id, principal, transition, false).await
    }

    /// Apply a lifecycle transition to a nomination round; other elections
    /// are not found.
    pub async fn transition_round(
        &self,
        id: ElectionId,
        principal: &Principal,
        transition: Transition,
    ) -> Result<AdminElectionDescription> {
        self.transition_audited(id, principal, transition, true).await
    }

    async fn transition_audited(
        &self,
        id: ElectionId,
        principal: &Principal,
        transition: Transition,
        nomination_only: bool,
    ) -> Result<AdminElectionDescription> {
        let started = Instant::now();
        let mut details = audit_details! {
            "uid" => principal.uid,
            "election_id" => id,
        };
        let result = match ensure_manager(principal) {
            Ok(()) => {
                self.retry_on_contention(move || {
                    self.attempt_transition(id, transition, nomination_only)
                })
                .await
            }
            Err(err) => Err(err),
        };
        if let Ok(election) = &result {
            details.insert("status".to_string(), election.status.as_str().into());
            match transition {
                Transition::Publish | Transition::Resume => {
                    self.closers.schedule_election(self, election).await
                }
                Transition::Close | Transition::Archive => self.closers.cancel(id).await,
                _ => {}
            }
        }
        self.audit(transition.action(), started, details, &result);
        result.map(AdminElectionDescription::from)
    }

    async fn attempt_transition(
        &self,
        id: ElectionId,
        transition: Transition,
        nomination_only: bool,
    ) -> Result<Election> {
        let mut tx = self.store.begin().await?;
        let result = self
            .transition_locked(tx.as_mut(), id, transition, nomination_only)
            .await;
        finish(tx, result).await
    }

    async fn transition_locked(
        &self,
        tx: &mut dyn Transaction,
        id: ElectionId,
        transition: Transition,
        nomination_only: bool,
    ) -> Result<Election> {
        let mut election = tx
            .lock_election(id)
            .await?
            .filter(|election| !nomination_only || election.is_nomination())
            .ok_or_else(|| scope_error(id, nomination_only))?;
        transition.apply(&mut election, self.clock.now())?;
        tx.save_election(&election).await?;
        Ok(election)
    }

    /// Close an election whose voting window has ended, so that its stored
    /// status catches up. Returns whether anything changed.
    pub async fn auto_close(&self, id: ElectionId) -> Result<bool> {
        let started = Instant::now();
        let result = self
            .retry_on_contention(move || self.attempt_auto_close(id))
            .await;
        if !matches!(result, Ok(false)) {
            self.audit("auto_close", started, audit_details! { "election_id" => id }, &result);
        }
        result
    }

    async fn attempt_auto_close(&self, id: ElectionId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let result = self.auto_close_locked(tx.as_mut(), id).await;
        finish(tx, result).await
    }

    async fn auto_close_locked(&self, tx: &mut dyn Transaction, id: ElectionId) -> Result<bool> {
        let now = self.clock.now();
        let mut election = match tx.lock_election(id).await? {
            Some(election) => election,
            None => return Ok(false),
        };
        let ended = election.scheduled_end.map_or(false, |end| end <= now);
        if !ended || !matches!(election.status, ElectionStatus::Published | ElectionStatus::Paused) {
            return Ok(false);
        }
        Transition::Close.apply(&mut election, now)?;
        tx.save_election(&election).await?;
        info!("Election {id} closed at the end of its voting window");
        Ok(true)
    }

    /// Irreversibly replace every member ID on a closed election's ballots
    /// and token registrations with a keyed one-way pseudonym. Afterwards
    /// nobody can tell whether a given member voted or took a token.
    pub async fn anonymize(
        &self,
        id: ElectionId,
        principal: &Principal,
    ) -> Result<AdminElectionDescription> {
        let started = Instant::now();
        let mut details = audit_details! {
            "uid" => principal.uid,
            "election_id" => id,
        };
        let result = match ensure_superadmin(principal) {
            Ok(()) => {
                self.retry_on_contention(move || self.attempt_anonymize(id))
                    .await
            }
            Err(err) => Err(err),
        };
        if let Ok(anonymized) = &result {
            details.insert("ballots_rewritten".to_string(), anonymized.ballots.into());
            details.insert(
                "registrations_rewritten".to_string(),
                anonymized.registrations.into(),
            );
        }
        self.audit("anonymize", started, details, &result);
        result.map(|anonymized| AdminElectionDescription::from(anonymized.election))
    }

    async fn attempt_anonymize(&self, id: ElectionId) -> Result<Anonymized> {
        let mut tx = self.store.begin().await?;
        let result = self.anonymize_locked(tx.as_mut(), id).await;
        finish(tx, result).await
    }

    async fn anonymize_locked(
        &self,
        tx: &mut dyn Transaction,
        id: ElectionId,
    ) -> Result<Anonymized> {
        let mut election = tx
            .lock_election(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election {id}")))?;
        if !election.status.is_final() {
            return Err(Error::Conflict(
                "Only closed or archived elections can be anonymized".to_string(),
            ));
        }
        if election.is_nomination() {
            return Err(Error::Conflict(
                "Nomination ballots always keep their voter's identity".to_string(),
            ));
        }
        if election.anonymized_at.is_some() {
            return Err(Error::Conflict(
                "This election has already been anonymized".to_string(),
            ));
        }

        // The election is closed and locked, so no ballot or token can be
        // added meanwhile.
        let ballots = self.store.ballots(id).await?;
        let registrations = self.store.token_registrations(id).await?;
        let mut pseudonyms = HashMap::new();
        let member_uids = ballots
            .iter()
            .filter(|ballot| !ballot.preserve_voter_identity)
            .filter_map(|ballot| ballot.member_uid.as_ref())
            .chain(registrations.iter().map(|registration| &registration.member_uid));
        for uid in member_uids {
            if !pseudonyms.contains_key(uid) {
                let replacement = pseudonym(&self.settings.anonymization_key, id, uid)?;
                pseudonyms.insert(uid.clone(), replacement);
            }
        }
        let ballots = tx.pseudonymise_ballots(id, &pseudonyms).await?;
        let registrations = tx.pseudonymise_registrations(id, &pseudonyms).await?;

        let now = self.clock.now();
        election.anonymized_at = Some(now);
        election.updated_at = now;
        tx.save_election(&election).await?;
        Ok(Anonymized {
            election,
            ballots,
            registrations,
        })
    }

    pub async fn admin_election(
        &self,
        id: ElectionId,
        principal: &Principal,
    ) -> Result<AdminElectionDescription> {
        ensure_manager(principal)?;
        self.store
            .election(id)
            .await?
            .map(AdminElectionDescription::from)
            .ok_or_else(|| Error::not_found(format!("Election {id}")))
    }

    /// Every election, hidden and draft ones included.
    pub async fn admin_elections(
        &self,
        principal: &Principal,
        status: Option<ElectionStatus>,
        pagination: Pagination,
    ) -> Result<Paginated<AdminElectionDescription>> {
        ensure_manager(principal)?;
        let filter = ElectionFilter {
            include_hidden: true,
            ..ElectionFilter::default()
        }
        .with_status(status);
        let elections = self.store.elections(&filter).await?;
        Ok(pagination
            .paginate(elections)
            .map(AdminElectionDescription::from))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::Clock;
    use crate::engine::testing::Harness;
    use crate::model::{api::election::NominationSpec, api::vote::VoteRequest};
    use crate::store::Store;

    fn vote(answer: &str) -> VoteRequest {
        VoteRequest {
            answer_ids: Some(vec![answer.to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let now = Utc::now();
        let mut election = Election::single_choice_example(1).with_status(ElectionStatus::Draft);

        assert!(Transition::Pause.apply(&mut election, now).is_err());
        Transition::Publish.apply(&mut election, now).unwrap();
        Transition::Pause.apply(&mut election, now).unwrap();
        Transition::Resume.apply(&mut election, now).unwrap();
        assert_eq!(election.status, ElectionStatus::Published);
        assert!(Transition::Archive.apply(&mut election, now).is_err());

        Transition::Close.apply(&mut election, now).unwrap();
        assert_eq!(election.closed_at, Some(now));
        assert!(matches!(
            Transition::Publish.apply(&mut election, now),
            Err(Error::Conflict(_))
        ));
        Transition::Archive.apply(&mut election, now).unwrap();

        Transition::Hide.apply(&mut election, now).unwrap();
        assert!(election.hidden);
        assert_eq!(election.status, ElectionStatus::Archived);
    }

    #[test]
    fn pseudonyms_are_keyed_and_scoped() {
        let a = pseudonym("key", 1, "m1").unwrap();
        assert!(a.starts_with(PSEUDONYM_PREFIX));
        assert_eq!(a, pseudonym("key", 1, "m1").unwrap());
        assert_ne!(a, pseudonym("key", 2, "m1").unwrap());
        assert_ne!(a, pseudonym("other key", 1, "m1").unwrap());
    }

    #[rocket::async_test]
    async fn create_then_publish() {
        let harness = Harness::new();
        let manager = Principal::manager();

        let created = harness
            .engine
            .create_election(&manager, ElectionSpec::single_choice_example())
            .await
            .unwrap();
        assert_eq!(created.description.status, ElectionStatus::Draft);
        let id = created.description.id;

        let mut spec = ElectionSpec::single_choice_example();
        spec.title = "Renamed".to_string();
        let modified = harness
            .engine
            .modify_election(id, &manager, spec.clone())
            .await
            .unwrap();
        assert_eq!(modified.description.title, "Renamed");

        harness
            .engine
            .transition(id, &manager, Transition::Publish)
            .await
            .unwrap();
        assert!(harness.engine.closers().has_closer(id).await);
        let late_edit = harness.engine.modify_election(id, &manager, spec).await;
        assert!(matches!(late_edit, Err(Error::Conflict(_))));

        let events = harness.audit.events();
        let actions: Vec<_> = events.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["create_election", "modify_election", "publish", "modify_election"]
        );
    }

    #[rocket::async_test]
    async fn members_cannot_manage_elections() {
        let harness = Harness::new();
        let member = Principal::member("m1");
        let result = harness
            .engine
            .create_election(&member, ElectionSpec::single_choice_example())
            .await;
        assert!(matches!(result, Err(Error::Eligibility(_))));
        assert!(harness.store.elections(&ElectionFilter::default()).await.unwrap().is_empty());
        assert!(!harness.audit.events_for("create_election")[0].success);
    }

    #[rocket::async_test]
    async fn round_transitions_only_touch_nomination_rounds() {
        let harness = Harness::new();
        harness.insert(Election::single_choice_example(1)).await;
        let manager = Principal::manager();
        let refused = harness
            .engine
            .transition_round(1, &manager, Transition::Close)
            .await;
        assert!(matches!(refused, Err(Error::NotFound(_))));

        let round = harness
            .engine
            .create_election(&manager, NominationSpec::example().into())
            .await
            .unwrap();
        let opened = harness
            .engine
            .transition_round(round.description.id, &manager, Transition::Publish)
            .await
            .unwrap();
        assert_eq!(opened.description.status, ElectionStatus::Published);
    }

    #[rocket::async_test]
    async fn explicit_close_ends_voting() {
        let harness = Harness::new();
        harness.insert(Election::single_choice_example(1)).await;
        harness
            .engine
            .transition(1, &Principal::manager(), Transition::Close)
            .await
            .unwrap();
        let election = harness.election(1).await;
        assert_eq!(election.status, ElectionStatus::Closed);
        assert_eq!(election.closed_at, Some(harness.clock.now()));

        let late = harness
            .engine
            .submit_vote(1, &Principal::member("m1"), vote("A"))
            .await;
        assert!(matches!(late, Err(Error::Window(_))));
    }

    #[rocket::async_test]
    async fn auto_close_only_after_the_window() {
        let harness = Harness::new();
        harness.insert(Election::single_choice_example(1)).await;

        assert!(!harness.engine.auto_close(1).await.unwrap());
        assert_eq!(harness.election(1).await.status, ElectionStatus::Published);

        harness.clock.advance(Duration::days(8));
        assert!(harness.engine.auto_close(1).await.unwrap());
        assert_eq!(harness.election(1).await.status, ElectionStatus::Closed);
        assert_eq!(harness.audit.events_for("auto_close").len(), 1);
    }

    #[rocket::async_test]
    async fn anonymization_is_superadmin_only_and_irreversible() {
        let harness = Harness::new();
        harness.insert(Election::single_choice_example(1)).await;
        harness
            .engine
            .submit_vote(1, &Principal::member("m1"), vote("A"))
            .await
            .unwrap();

        let open = harness.engine.anonymize(1, &Principal::superadmin()).await;
        assert!(matches!(open, Err(Error::Conflict(_))));

        harness
            .engine
            .transition(1, &Principal::manager(), Transition::Close)
            .await
            .unwrap();
        let manager = harness.engine.anonymize(1, &Principal::manager()).await;
        assert!(matches!(manager, Err(Error::Eligibility(_))));

        let done = harness
            .engine
            .anonymize(1, &Principal::superadmin())
            .await
            .unwrap();
        assert!(done.anonymized_at.is_some());

        let ballots = harness.store.ballots(1).await.unwrap();
        let uid = ballots[0].member_uid.as_deref().unwrap();
        assert!(uid.starts_with(PSEUDONYM_PREFIX));
        let voted = harness.store.voted_elections("m1", &[1]).await.unwrap();
        assert!(voted.is_empty());

        let again = harness.engine.anonymize(1, &Principal::superadmin()).await;
        assert!(matches!(again, Err(Error::Conflict(_))));
        let events = harness.audit.events_for("anonymize");
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].details["ballots_rewritten"], 1);
    }

    #[rocket::async_test]
    async fn anonymization_covers_token_registrations() {
        let harness = Harness::new();
        harness.insert(Election::single_choice_example(1)).await;
        harness
            .engine
            .issue_token(1, &Principal::member("holder"))
            .await
            .unwrap();
        harness
            .engine
            .transition(1, &Principal::manager(), Transition::Close)
            .await
            .unwrap();

        harness
            .engine
            .anonymize(1, &Principal::superadmin())
            .await
            .unwrap();

        let registrations = harness.store.token_registrations(1).await.unwrap();
        assert_eq!(registrations.len(), 1);
        assert!(registrations[0].member_uid.starts_with(PSEUDONYM_PREFIX));
        let mut tx = harness.store.begin().await.unwrap();
        assert!(!tx.has_token_registration(1, "holder").await.unwrap());
        tx.rollback().await.unwrap();

        let events = harness.audit.events_for("anonymize");
        assert_eq!(events[0].details["registrations_rewritten"], 1);
        assert_eq!(events[0].details["ballots_rewritten"], 0);
    }

    #[rocket::async_test]
    async fn nomination_rounds_are_never_anonymized() {
        let harness = Harness::new();
        harness
            .insert(Election::nomination_example(1).with_status(ElectionStatus::Closed))
            .await;
        let result = harness.engine.anonymize(1, &Principal::superadmin()).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[rocket::async_test]
    async fn admin_listing_includes_drafts_and_hidden() {
        let harness = Harness::new();
        harness
            .insert(Election::single_choice_example(1).with_status(ElectionStatus::Draft))
            .await;
        let mut hidden = Election::single_choice_example(2);
        hidden.hidden = true;
        harness.insert(hidden).await;

        let page = harness
            .engine
            .admin_elections(&Principal::manager(), None, Pagination::new(1, 10).unwrap())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);

        let drafts = harness
            .engine
            .admin_elections(
                &Principal::manager(),
                Some(ElectionStatus::Draft),
                Pagination::new(1, 10).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(drafts.items.len(), 1);
    }
}
