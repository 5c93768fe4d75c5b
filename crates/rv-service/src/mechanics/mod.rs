//! Selection mechanics.
//!
//! Every mechanic turns a candidate snapshot into exactly one winner plus an
//! audit payload through [`SelectionMechanic::run`]. Each round draws a 64-bit
//! seed; the round's RNG is seeded from it and the seed is stored in the
//! payload, so an outcome can be replayed from the history.
//!
//! Roulette and dice are stateless and run as soon as the round starts. The
//! speed quiz and timing duel collect player input first and run when the
//! session actor closes them.

pub mod dice;
pub mod duel;
pub mod quiz;
pub mod roulette;

pub use dice::{Dice, DiceRoll};
pub use duel::{DuelEntry, DuelRound, DuelSummary};
pub use quiz::{QuestionView, QuizRound, QuizStep, QuizSummary, ScoredAnswer};
pub use roulette::{Roulette, RouletteSpin};

use crate::errors::RvError;
use crate::models::Mechanic;
use common::types::CandidateId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mechanic error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MechanicError {
    #[error("No candidates yet")]
    EmptyPool,

    /// Nobody played; the round is cancelled with this reason.
    #[error("{0}")]
    NoParticipation(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Duplicate(String),

    /// The question or duel no longer accepts input.
    #[error("{0}")]
    Closed(String),
}

impl From<MechanicError> for RvError {
    fn from(err: MechanicError) -> Self {
        match err {
            MechanicError::EmptyPool => RvError::no_candidates(),
            MechanicError::NoParticipation(reason) => RvError::InvalidState(reason),
            MechanicError::InvalidInput(reason) => RvError::BadRequest(reason),
            MechanicError::Duplicate(reason) | MechanicError::Closed(reason) => {
                RvError::Conflict(reason)
            }
        }
    }
}

/// Per-round randomness, reproducible from its seed.
#[derive(Debug, Clone)]
pub struct RoundContext {
    seed: u64,
    rng: StdRng,
}

impl RoundContext {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw a fresh seed from the thread RNG.
    pub fn random() -> Self {
        Self::from_seed(rand::random())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// A mechanic's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicOutcome {
    pub winner: CandidateId,
    pub payload: SelectionPayload,
}

/// Uniform mechanic contract.
pub trait SelectionMechanic {
    fn mechanic(&self) -> Mechanic;

    /// Choose one winner from `candidates`.
    fn run(
        &self,
        candidates: &[CandidateId],
        ctx: &mut RoundContext,
    ) -> Result<MechanicOutcome, MechanicError>;
}

/// Audit payload stored with each selection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SelectionPayload {
    Roulette(RouletteSpin),
    Dice(DiceRoll),
    SpeedQuiz(QuizSummary),
    TimingDuel(DuelSummary),
    ManualTiebreak { tied: Vec<CandidateId> },
}

impl SelectionPayload {
    /// Seed the outcome was drawn with, if any.
    pub fn seed(&self) -> Option<u64> {
        match self {
            SelectionPayload::Roulette(spin) => Some(spin.seed),
            SelectionPayload::Dice(roll) => Some(roll.seed),
            SelectionPayload::SpeedQuiz(summary) => Some(summary.seed),
            SelectionPayload::TimingDuel(summary) => Some(summary.seed),
            SelectionPayload::ManualTiebreak { .. } => None,
        }
    }
}
