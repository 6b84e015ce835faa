mod desc;
mod results;
mod spec;

pub use desc::{AdminElectionDescription, ElectionDescription, ElectionSummary};
pub use results::{
    AnswerTally, CandidateRankStats, ChoiceResults, ElectionResults, JustificationView,
    NominationBallotView, NominationResults, RankedResults, ResultsDetail,
};
pub use spec::{ElectionSpec, NominationSpec};
