//! Counting of ranked ballots.
//!
//! [`tally`] is a pure function of its input: it reads nothing, writes
//! nothing and always produces the same outcome for the same ballots, so
//! callers may cache or recompute it freely.
//!
//! Under STV, surpluses are transferred with the inclusive Gregory method:
//! every ballot counting for a newly elected candidate moves on to its next
//! continuing preference at `weight × surplus / total`.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::model::common::election::{AnswerId, QuotaType, RankedMethod};

/// Vote totals closer than this are treated as equal.
const EPSILON: f64 = 1e-9;

/// What to count.
#[derive(Debug, Clone, Copy)]
pub struct TallyInput<'a> {
    /// Candidate IDs, in the order the election lists them.
    pub candidates: &'a [AnswerId],
    pub seats_to_fill: u32,
    pub method: RankedMethod,
    pub quota_type: QuotaType,
    /// Preference lists, most preferred first.
    pub ballots: &'a [Vec<AnswerId>],
}

/// First preferences received by one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstPreferenceCount {
    pub candidate_id: AnswerId,
    pub votes: u64,
    /// Share of valid ballots, rounded to one decimal place.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateVotes {
    pub candidate_id: AnswerId,
    pub votes: f64,
}

/// Trace of one counting round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub round: u32,
    /// Continuing candidates at the start of the round, most votes first.
    pub tallies: Vec<CandidateVotes>,
    pub elected: Vec<AnswerId>,
    pub eliminated: Vec<AnswerId>,
    /// Ballot weight with no continuing preference left.
    pub exhausted: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TallyOutcome {
    /// In order of election.
    pub winners: Vec<AnswerId>,
    /// Every candidate not elected, in order of elimination.
    pub eliminated: Vec<AnswerId>,
    /// Empty unless counted by STV.
    pub rounds: Vec<RoundSummary>,
    pub quota: Option<u64>,
    pub valid_ballots: u64,
    /// Most first preferences first.
    pub first_preference_counts: Vec<FirstPreferenceCount>,
}

/// Round to the given number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// `part` as a percentage of `whole`, to one decimal place; zero if `whole` is.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 * 100.0 / whole as f64, 1)
    }
}

/// Votes needed for election, or `None` for plurality counting.
pub fn quota(quota_type: QuotaType, valid_ballots: u64, seats: u32) -> Option<u64> {
    let seats = u64::from(seats);
    if seats == 0 {
        return None;
    }
    match quota_type {
        QuotaType::Droop => Some(valid_ballots / (seats + 1) + 1),
        QuotaType::Hare => Some((valid_ballots + seats - 1) / seats),
        QuotaType::None => None,
    }
}

/// Reduce each ballot to candidate indices, dropping unknown and repeated
/// IDs. Ballots with nothing left are invalid and dropped.
fn valid_ballots(candidates: &[AnswerId], ballots: &[Vec<AnswerId>]) -> Vec<Vec<usize>> {
    ballots
        .iter()
        .map(|ballot| {
            let mut seen = HashSet::new();
            ballot
                .iter()
                .filter_map(|id| candidates.iter().position(|candidate| candidate == id))
                .filter(|&index| seen.insert(index))
                .collect::<Vec<_>>()
        })
        .filter(|preferences| !preferences.is_empty())
        .collect()
}

pub fn tally(input: &TallyInput<'_>) -> TallyOutcome {
    let candidates = input.candidates;
    let ballots = valid_ballots(candidates, input.ballots);
    let valid = ballots.len() as u64;

    let mut first_preferences = vec![0u64; candidates.len()];
    for preferences in &ballots {
        first_preferences[preferences[0]] += 1;
    }

    let quota = quota(input.quota_type, valid, input.seats_to_fill);
    let seats = (input.seats_to_fill as usize).min(candidates.len());
    let (winners, eliminated, rounds) = match (input.method, quota) {
        (RankedMethod::Stv, Some(quota)) => {
            Count::new(candidates, ballots, first_preferences.clone()).run(seats, quota)
        }
        _ => simple(&first_preferences, seats),
    };

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| first_preferences[b].cmp(&first_preferences[a]));
    let first_preference_counts = order
        .into_iter()
        .map(|index| FirstPreferenceCount {
            candidate_id: candidates[index].clone(),
            votes: first_preferences[index],
            percentage: percentage(first_preferences[index], valid),
        })
        .collect();

    let ids = |indices: Vec<usize>| -> Vec<AnswerId> {
        indices.into_iter().map(|index| candidates[index].clone()).collect()
    };
    TallyOutcome {
        winners: ids(winners),
        eliminated: ids(eliminated),
        rounds,
        quota,
        valid_ballots: valid,
        first_preference_counts,
    }
}

/// Plurality of first preferences; ties go to the candidate listed first.
fn simple(first_preferences: &[u64], seats: usize) -> (Vec<usize>, Vec<usize>, Vec<RoundSummary>) {
    let mut order: Vec<usize> = (0..first_preferences.len()).collect();
    order.sort_by(|&a, &b| first_preferences[b].cmp(&first_preferences[a]));
    let eliminated = order.split_off(seats);
    (order, eliminated, Vec::new())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Standing {
    Continuing,
    Elected,
    Eliminated,
}

struct WeightedBallot {
    preferences: Vec<usize>,
    position: usize,
    weight: f64,
}

impl WeightedBallot {
    fn holder(&self) -> Option<usize> {
        self.preferences.get(self.position).copied()
    }
}

fn compare_votes(a: f64, b: f64) -> Ordering {
    if (a - b).abs() < EPSILON {
        Ordering::Equal
    } else if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// State of an STV count in progress.
struct Count<'a> {
    candidates: &'a [AnswerId],
    ballots: Vec<WeightedBallot>,
    standing: Vec<Standing>,
    /// Votes each elected candidate keeps.
    kept: Vec<f64>,
    /// Tallies of every round so far, current round last.
    history: Vec<Vec<f64>>,
    first_preferences: Vec<u64>,
}

impl<'a> Count<'a> {
    fn new(candidates: &'a [AnswerId], ballots: Vec<Vec<usize>>, first_preferences: Vec<u64>) -> Self {
        Self {
            candidates,
            ballots: ballots
                .into_iter()
                .map(|preferences| WeightedBallot {
                    preferences,
                    position: 0,
                    weight: 1.0,
                })
                .collect(),
            standing: vec![Standing::Continuing; candidates.len()],
            kept: vec![0.0; candidates.len()],
            history: Vec::new(),
            first_preferences,
        }
    }

    fn continuing(&self) -> Vec<usize> {
        (0..self.candidates.len())
            .filter(|&index| self.standing[index] == Standing::Continuing)
            .collect()
    }

    fn tallies(&self) -> Vec<f64> {
        let mut tallies = vec![0.0; self.candidates.len()];
        for ballot in &self.ballots {
            if let Some(holder) = ballot.holder() {
                if self.standing[holder] == Standing::Continuing {
                    tallies[holder] += ballot.weight;
                }
            }
        }
        tallies
    }

    /// `Less` if `a` is weaker than `b`: fewer votes now, then in earlier
    /// rounds, then fewer first preferences, then listed later.
    fn compare(&self, a: usize, b: usize) -> Ordering {
        self.history
            .iter()
            .rev()
            .map(|tallies| compare_votes(tallies[a], tallies[b]))
            .chain(std::iter::once(
                self.first_preferences[a].cmp(&self.first_preferences[b]),
            ))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| b.cmp(&a))
    }

    /// Strongest first.
    fn rank(&self, indices: &mut [usize]) {
        indices.sort_by(|&a, &b| self.compare(b, a));
    }

    /// Move the ballots held by `from` to their next continuing preference,
    /// scaling their weight by `factor`.
    fn transfer(&mut self, from: usize, factor: f64) {
        let standing = &self.standing;
        for ballot in self.ballots.iter_mut().filter(|ballot| ballot.holder() == Some(from)) {
            ballot.weight *= factor;
            ballot.position += 1;
            while let Some(next) = ballot.holder() {
                if standing[next] == Standing::Continuing {
                    break;
                }
                ballot.position += 1;
            }
        }
    }

    fn names(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .map(|&index| self.candidates[index].as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn run(mut self, seats: usize, quota: u64) -> (Vec<usize>, Vec<usize>, Vec<RoundSummary>) {
        let quota_votes = quota as f64;
        let total = self.ballots.len() as f64;
        let mut winners = Vec::new();
        let mut eliminated = Vec::new();
        let mut rounds = Vec::new();

        while winners.len() < seats {
            let number = rounds.len() as u32 + 1;
            let tallies = self.tallies();
            self.history.push(tallies.clone());

            let mut continuing = self.continuing();
            self.rank(&mut continuing);
            let remaining = seats - winners.len();
            let held: f64 = continuing.iter().map(|&index| tallies[index]).sum();
            let exhausted = (total - held - self.kept.iter().sum::<f64>()).max(0.0);
            let snapshot = continuing
                .iter()
                .map(|&index| CandidateVotes {
                    candidate_id: self.candidates[index].clone(),
                    votes: round_to(tallies[index], 4),
                })
                .collect();

            let mut elected = Vec::new();
            let mut dropped = Vec::new();
            let description;
            if continuing.len() <= remaining {
                for &index in &continuing {
                    self.standing[index] = Standing::Elected;
                    self.kept[index] = tallies[index];
                }
                description = format!(
                    "Round {number}: {} elected to fill the remaining seats",
                    self.names(&continuing)
                );
                elected = continuing;
            } else {
                let mut reaching: Vec<usize> = continuing
                    .iter()
                    .copied()
                    .filter(|&index| tallies[index] > 0.0 && tallies[index] + EPSILON >= quota_votes)
                    .collect();
                reaching.truncate(remaining);

                if reaching.is_empty() {
                    // Weakest last after ranking.
                    if let Some(&loser) = continuing.last() {
                        self.standing[loser] = Standing::Eliminated;
                        self.transfer(loser, 1.0);
                        description = format!(
                            "Round {number}: no candidate reached the quota of {quota}; {} eliminated with {}",
                            self.candidates[loser],
                            round_to(tallies[loser], 4)
                        );
                        dropped.push(loser);
                    } else {
                        break;
                    }
                } else {
                    for &index in &reaching {
                        self.standing[index] = Standing::Elected;
                    }
                    let seats_left = winners.len() + reaching.len() < seats;
                    for &index in &reaching {
                        let surplus = tallies[index] - quota_votes;
                        if seats_left && surplus > EPSILON {
                            self.kept[index] = quota_votes;
                            self.transfer(index, surplus / tallies[index]);
                        } else {
                            self.kept[index] = tallies[index];
                        }
                    }
                    description = format!(
                        "Round {number}: {} reached the quota of {quota} and elected",
                        self.names(&reaching)
                    );
                    elected = reaching;
                }
            }

            rounds.push(RoundSummary {
                round: number,
                tallies: snapshot,
                elected: elected.iter().map(|&index| self.candidates[index].clone()).collect(),
                eliminated: dropped.iter().map(|&index| self.candidates[index].clone()).collect(),
                exhausted: round_to(exhausted, 4),
                description,
            });
            winners.extend(elected);
            eliminated.extend(dropped);
        }

        let mut unelected = self.continuing();
        self.rank(&mut unelected);
        unelected.reverse();
        eliminated.extend(unelected);
        (winners, eliminated, rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<AnswerId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn ballots(ballots: &[&[&str]]) -> Vec<Vec<AnswerId>> {
        ballots.iter().map(|ballot| ids(ballot)).collect()
    }

    fn count(
        candidates: &[&str],
        seats_to_fill: u32,
        method: RankedMethod,
        quota_type: QuotaType,
        cast: &[&[&str]],
    ) -> TallyOutcome {
        let candidates = ids(candidates);
        let cast = ballots(cast);
        tally(&TallyInput {
            candidates: &candidates,
            seats_to_fill,
            method,
            quota_type,
            ballots: &cast,
        })
    }

    #[test]
    fn droop_scenario_eliminates_then_elects() {
        let outcome = count(
            &["A", "B", "C"],
            1,
            RankedMethod::Stv,
            QuotaType::Droop,
            &[&["A"], &["A"], &["B"], &["B"], &["C", "A"]],
        );
        assert_eq!(outcome.quota, Some(3));

        let first = &outcome.rounds[0];
        assert!(first.elected.is_empty());
        assert_eq!(first.eliminated, ids(&["C"]));
        assert_eq!(
            first.tallies.iter().map(|t| t.votes).collect::<Vec<_>>(),
            vec![2.0, 2.0, 1.0]
        );

        let last = outcome.rounds.last().unwrap();
        assert_eq!(last.elected, ids(&["A"]));
        assert_eq!(last.tallies[0].votes, 3.0);
        assert_eq!(outcome.winners, ids(&["A"]));
        assert_eq!(outcome.eliminated, ids(&["C", "B"]));
    }

    #[test]
    fn surplus_moves_at_fractional_weight() {
        let outcome = count(
            &["A", "B", "C"],
            2,
            RankedMethod::Stv,
            QuotaType::Droop,
            &[
                &["A", "B"],
                &["A", "B"],
                &["A", "B"],
                &["A", "B"],
                &["C"],
                &["B"],
            ],
        );
        assert_eq!(outcome.quota, Some(3));
        assert_eq!(outcome.rounds[0].elected, ids(&["A"]));
        // 1 first preference plus 4 ballots at a quarter each.
        let b = outcome.rounds[1]
            .tallies
            .iter()
            .find(|t| t.candidate_id == "B")
            .unwrap();
        assert_eq!(b.votes, 2.0);
        assert_eq!(outcome.winners, ids(&["A", "B"]));
        assert_eq!(outcome.eliminated, ids(&["C"]));
    }

    #[test]
    fn hare_quota_rounds_up() {
        assert_eq!(quota(QuotaType::Hare, 7, 2), Some(4));
        assert_eq!(quota(QuotaType::Droop, 7, 2), Some(3));
        assert_eq!(quota(QuotaType::Droop, 1, 1), Some(1));
        assert_eq!(quota(QuotaType::None, 7, 2), None);
    }

    #[test]
    fn simple_method_ranks_first_preferences_without_rounds() {
        let outcome = count(
            &["A", "B", "C"],
            2,
            RankedMethod::Simple,
            QuotaType::Droop,
            &[&["C", "A"], &["C"], &["B"], &["A", "B"], &["B", "C"]],
        );
        assert!(outcome.rounds.is_empty());
        assert_eq!(outcome.winners, ids(&["B", "C"]));
        assert_eq!(outcome.eliminated, ids(&["A"]));
    }

    #[test]
    fn no_quota_falls_back_to_plurality() {
        let outcome = count(
            &["A", "B"],
            1,
            RankedMethod::Stv,
            QuotaType::None,
            &[&["B"], &["A"], &["B"]],
        );
        assert_eq!(outcome.quota, None);
        assert!(outcome.rounds.is_empty());
        assert_eq!(outcome.winners, ids(&["B"]));
    }

    #[test]
    fn full_tie_eliminates_the_later_listed_candidate() {
        let outcome = count(
            &["A", "B"],
            1,
            RankedMethod::Stv,
            QuotaType::Droop,
            &[&["A"], &["B"]],
        );
        assert_eq!(outcome.rounds[0].eliminated, ids(&["B"]));
        assert_eq!(outcome.winners, ids(&["A"]));
    }

    #[test]
    fn invalid_preferences_are_dropped() {
        let outcome = count(
            &["A", "B"],
            1,
            RankedMethod::Stv,
            QuotaType::Droop,
            &[&["Z"], &["A", "A", "B"], &[], &["B", "Z"], &["A"]],
        );
        assert_eq!(outcome.valid_ballots, 3);
        assert_eq!(outcome.first_preference_counts[0].candidate_id, "A");
        assert_eq!(outcome.first_preference_counts[0].votes, 2);
        assert_eq!(outcome.first_preference_counts[0].percentage, 66.7);
    }

    #[test]
    fn winners_fill_every_seat_and_first_preferences_add_up() {
        let cast: &[&[&str]] = &[
            &["A", "B", "C"],
            &["B", "A"],
            &["C"],
            &["D", "C"],
            &["A"],
            &["E", "D"],
            &["B"],
        ];
        for seats in 1..=6 {
            for method in [RankedMethod::Stv, RankedMethod::Simple] {
                for quota_type in [QuotaType::Droop, QuotaType::Hare, QuotaType::None] {
                    let outcome = count(&["A", "B", "C", "D", "E"], seats, method, quota_type, cast);
                    assert_eq!(outcome.winners.len(), (seats as usize).min(5));
                    assert_eq!(outcome.winners.len() + outcome.eliminated.len(), 5);
                    let sum: u64 = outcome.first_preference_counts.iter().map(|c| c.votes).sum();
                    assert_eq!(sum, outcome.valid_ballots);
                }
            }
        }
    }

    #[test]
    fn empty_ballot_box_still_terminates() {
        let outcome = count(&["A", "B", "C"], 2, RankedMethod::Stv, QuotaType::Hare, &[]);
        assert_eq!(outcome.quota, Some(0));
        assert_eq!(outcome.winners.len(), 2);
    }
}
