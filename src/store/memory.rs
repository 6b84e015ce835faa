use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rocket::tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::model::{
    common::election::{ElectionId, MemberUid},
    db::{Ballot, BallotJustification, Election, TokenRegistration, VotingToken},
};

use super::{ElectionFilter, Store, Transaction};

#[derive(Debug, Default)]
struct Tables {
    last_election_id: ElectionId,
    elections: BTreeMap<ElectionId, Election>,
    ballots: Vec<Ballot>,
    justifications: Vec<BallotJustification>,
    tokens: HashMap<String, VotingToken>,
    registrations: Vec<TokenRegistration>,
}

type LockTable<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    election_locks: LockTable<ElectionId>,
    token_locks: LockTable<String>,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_handle<K>(table: &LockTable<K>, key: K) -> Arc<AsyncMutex<()>>
where
    K: std::hash::Hash + Eq,
{
    table
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .entry(key)
        .or_default()
        .clone()
}

/// An in-process store with the same transactional behaviour as the MongoDB
/// one: election locks queue, token locks fail fast, and writes only become
/// visible on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            guards: Vec::new(),
            writes: Vec::new(),
        }))
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.inner.tables().elections.get(&id).cloned())
    }

    async fn elections(&self, filter: &ElectionFilter) -> Result<Vec<Election>> {
        Ok(self
            .inner
            .tables()
            .elections
            .values()
            .filter(|election| filter.matches(election))
            .cloned()
            .collect())
    }

    async fn voted_elections(
        &self,
        member_uid: &str,
        ids: &[ElectionId],
    ) -> Result<HashSet<ElectionId>> {
        Ok(self
            .inner
            .tables()
            .ballots
            .iter()
            .filter(|ballot| {
                ballot.member_uid.as_deref() == Some(member_uid) && ids.contains(&ballot.election_id)
            })
            .map(|ballot| ballot.election_id)
            .collect())
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        Ok(self
            .inner
            .tables()
            .ballots
            .iter()
            .filter(|ballot| ballot.election_id == election_id)
            .cloned()
            .collect())
    }

    async fn justifications(&self, election_id: ElectionId) -> Result<Vec<BallotJustification>> {
        Ok(self
            .inner
            .tables()
            .justifications
            .iter()
            .filter(|justification| justification.election_id == election_id)
            .cloned()
            .collect())
    }

    async fn token(&self, token_hash: &str) -> Result<Option<VotingToken>> {
        Ok(self.inner.tables().tokens.get(token_hash).cloned())
    }

    async fn token_registrations(&self, election_id: ElectionId) -> Result<Vec<TokenRegistration>> {
        Ok(self
            .inner
            .tables()
            .registrations
            .iter()
            .filter(|registration| registration.election_id == election_id)
            .cloned()
            .collect())
    }
}

/// A buffered write, applied at commit.
#[derive(Debug)]
enum Write {
    Election(Election),
    Ballots(Vec<Ballot>),
    Justifications(Vec<BallotJustification>),
    Token(TokenRegistration, VotingToken),
    TokenUsed(String, DateTime<Utc>),
    Pseudonyms(ElectionId, HashMap<MemberUid, MemberUid>),
    RegistrationPseudonyms(ElectionId, HashMap<MemberUid, MemberUid>),
}

pub struct MemoryTransaction {
    inner: Arc<Inner>,
    guards: Vec<OwnedMutexGuard<()>>,
    writes: Vec<Write>,
}

impl MemoryTransaction {
    /// Reject writes that would break a uniqueness rule of the committed data.
    fn check(&self, tables: &Tables) -> Result<()> {
        let mut member_answers: HashSet<(ElectionId, &str, Option<&str>)> = tables
            .ballots
            .iter()
            .filter_map(|ballot| {
                Some((
                    ballot.election_id,
                    ballot.member_uid.as_deref()?,
                    ballot.answer_id.as_deref(),
                ))
            })
            .collect();
        let mut registrations: HashSet<(ElectionId, &str)> = tables
            .registrations
            .iter()
            .map(|registration| (registration.election_id, registration.member_uid.as_str()))
            .collect();

        for write in &self.writes {
            match write {
                Write::Ballots(ballots) => {
                    for ballot in ballots {
                        if let Some(uid) = ballot.member_uid.as_deref() {
                            let key = (ballot.election_id, uid, ballot.answer_id.as_deref());
                            if !member_answers.insert(key) {
                                return Err(Error::Conflict(format!(
                                    "Member has already voted in election {}",
                                    ballot.election_id
                                )));
                            }
                        }
                    }
                }
                Write::Token(registration, token) => {
                    let key = (registration.election_id, registration.member_uid.as_str());
                    if !registrations.insert(key) || tables.tokens.contains_key(&token.token_hash)
                    {
                        return Err(Error::Conflict(format!(
                            "A voting token was already issued for election {}",
                            registration.election_id
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(write: Write, tables: &mut Tables) {
        match write {
            Write::Election(election) => {
                tables.last_election_id = tables.last_election_id.max(election.id);
                tables.elections.insert(election.id, election);
            }
            Write::Ballots(ballots) => tables.ballots.extend(ballots),
            Write::Justifications(justifications) => {
                tables.justifications.extend(justifications)
            }
            Write::Token(registration, token) => {
                tables.registrations.push(registration);
                tables.tokens.insert(token.token_hash.clone(), token);
            }
            Write::TokenUsed(token_hash, at) => {
                if let Some(token) = tables.tokens.get_mut(&token_hash) {
                    token.used = true;
                    token.used_at = Some(at);
                }
            }
            Write::Pseudonyms(election_id, pseudonyms) => {
                for ballot in tables
                    .ballots
                    .iter_mut()
                    .filter(|ballot| ballot.election_id == election_id)
                {
                    if let Some(pseudonym) = ballot
                        .member_uid
                        .as_ref()
                        .and_then(|uid| pseudonyms.get(uid))
                    {
                        ballot.member_uid = Some(pseudonym.clone());
                    }
                }
            }
            Write::RegistrationPseudonyms(election_id, pseudonyms) => {
                for registration in tables
                    .registrations
                    .iter_mut()
                    .filter(|registration| registration.election_id == election_id)
                {
                    if let Some(pseudonym) = pseudonyms.get(&registration.member_uid) {
                        registration.member_uid = pseudonym.clone();
                    }
                }
            }
        }
    }
}

#[rocket::async_trait]
impl Transaction for MemoryTransaction {
    async fn next_election_id(&mut self) -> Result<ElectionId> {
        let mut tables = self.inner.tables();
        tables.last_election_id += 1;
        Ok(tables.last_election_id)
    }

    async fn insert_election(&mut self, election: &Election) -> Result<()> {
        if self.inner.tables().elections.contains_key(&election.id) {
            return Err(Error::Conflict(format!(
                "Election {} already exists",
                election.id
            )));
        }
        self.writes.push(Write::Election(election.clone()));
        Ok(())
    }

    async fn lock_election(&mut self, id: ElectionId) -> Result<Option<Election>> {
        let handle = lock_handle(&self.inner.election_locks, id);
        self.guards.push(handle.lock_owned().await);
        Ok(self.inner.tables().elections.get(&id).cloned())
    }

    async fn election(&mut self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.inner.tables().elections.get(&id).cloned())
    }

    async fn save_election(&mut self, election: &Election) -> Result<()> {
        self.writes.push(Write::Election(election.clone()));
        Ok(())
    }

    async fn has_ballot(&mut self, election_id: ElectionId, member_uid: &str) -> Result<bool> {
        Ok(self.inner.tables().ballots.iter().any(|ballot| {
            ballot.election_id == election_id && ballot.member_uid.as_deref() == Some(member_uid)
        }))
    }

    async fn has_token_registration(
        &mut self,
        election_id: ElectionId,
        member_uid: &str,
    ) -> Result<bool> {
        Ok(self.inner.tables().registrations.iter().any(|registration| {
            registration.election_id == election_id && registration.member_uid == member_uid
        }))
    }

    async fn insert_ballots(&mut self, ballots: Vec<Ballot>) -> Result<()> {
        self.writes.push(Write::Ballots(ballots));
        Ok(())
    }

    async fn insert_justifications(
        &mut self,
        justifications: Vec<BallotJustification>,
    ) -> Result<()> {
        self.writes.push(Write::Justifications(justifications));
        Ok(())
    }

    async fn register_token(
        &mut self,
        registration: TokenRegistration,
        token: VotingToken,
    ) -> Result<()> {
        self.writes.push(Write::Token(registration, token));
        // Surface the duplicate now rather than at commit.
        self.check(&self.inner.tables())
    }

    async fn lock_token(&mut self, token_hash: &str) -> Result<Option<VotingToken>> {
        let handle = lock_handle(&self.inner.token_locks, token_hash.to_string());
        let guard = handle
            .try_lock_owned()
            .map_err(|_| Error::Contention("Voting token is in use".to_string()))?;
        self.guards.push(guard);
        Ok(self.inner.tables().tokens.get(token_hash).cloned())
    }

    async fn mark_token_used(&mut self, token_hash: &str, at: DateTime<Utc>) -> Result<()> {
        self.writes
            .push(Write::TokenUsed(token_hash.to_string(), at));
        Ok(())
    }

    async fn pseudonymise_ballots(
        &mut self,
        election_id: ElectionId,
        pseudonyms: &HashMap<MemberUid, MemberUid>,
    ) -> Result<u64> {
        let rewritten = self
            .inner
            .tables()
            .ballots
            .iter()
            .filter(|ballot| {
                ballot.election_id == election_id
                    && ballot
                        .member_uid
                        .as_ref()
                        .map_or(false, |uid| pseudonyms.contains_key(uid))
            })
            .count() as u64;
        self.writes
            .push(Write::Pseudonyms(election_id, pseudonyms.clone()));
        Ok(rewritten)
    }

    async fn pseudonymise_registrations(
        &mut self,
        election_id: ElectionId,
        pseudonyms: &HashMap<MemberUid, MemberUid>,
    ) -> Result<u64> {
        let rewritten = self
            .inner
            .tables()
            .registrations
            .iter()
            .filter(|registration| {
                registration.election_id == election_id
                    && pseudonyms.contains_key(&registration.member_uid)
            })
            .count() as u64;
        self.writes
            .push(Write::RegistrationPseudonyms(election_id, pseudonyms.clone()));
        Ok(rewritten)
    }

    async fn commit(&mut self) -> Result<()> {
        {
            let mut tables = self.inner.tables();
            self.check(&tables)?;
            for write in self.writes.drain(..) {
                Self::apply(write, &mut tables);
            }
        }
        self.guards.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.writes.clear();
        self.guards.clear();
        Ok(())
    }
}
