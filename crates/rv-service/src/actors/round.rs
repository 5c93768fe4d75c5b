//! Active round state owned by a `SessionActor`.
//!
//! ```text
//! Starting -> Running -> Finishing -> (recorded)
//!                 \            \
//!                  +------------+--> (cancelled)
//! ```
//!
//! Roulette and dice skip `Running`: their outcome is drawn when the round
//! begins. The speed quiz and timing duel stay `Running` until every player
//! is done or their deadline passes.

use crate::auth::RoundLease;
use crate::mechanics::{
    Dice, DuelRound, MechanicError, MechanicOutcome, QuestionView, QuizRound, Roulette,
    RoundContext, SelectionMechanic,
};
use crate::models::{Candidate, Mechanic};
use chrono::{DateTime, Utc};
use common::types::{CandidateId, ParticipantId, RoundId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundPhase {
    Starting,
    Running,
    Finishing,
}

/// Mechanic-specific part of a [`RoundView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RoundDetail {
    /// Roulette and dice.
    Instant {
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<MechanicOutcome>,
    },
    SpeedQuiz {
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<QuestionView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        closes_at: Option<DateTime<Utc>>,
        answers: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<MechanicOutcome>,
    },
    TimingDuel {
        target_ms: u64,
        auto_end_at: DateTime<Utc>,
        submitted: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<MechanicOutcome>,
    },
}

/// Public view of the active round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub round_id: RoundId,
    pub mechanic: Mechanic,
    pub owner: ParticipantId,
    pub phase: RoundPhase,
    /// Candidate snapshot taken when the round started.
    pub candidates: Vec<CandidateId>,
    pub started_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub detail: RoundDetail,
}

pub(crate) enum RoundPlay {
    Roulette,
    Dice,
    Quiz(QuizRound),
    Duel(DuelRound),
}

impl RoundPlay {
    /// Set up play for `mechanic`. Quiz questions open at `now`.
    pub(crate) fn new(
        mechanic: Mechanic,
        candidates: &[Candidate],
        ctx: &mut RoundContext,
        expected_players: usize,
        question_window: Duration,
        duel_grace: Duration,
        now: Instant,
    ) -> Result<Self, MechanicError> {
        match mechanic {
            Mechanic::Roulette => Ok(RoundPlay::Roulette),
            Mechanic::Dice => Ok(RoundPlay::Dice),
            Mechanic::SpeedQuiz => Ok(RoundPlay::Quiz(QuizRound::new(
                candidates,
                ctx,
                expected_players,
                question_window,
                now,
            )?)),
            Mechanic::TimingDuel => Ok(RoundPlay::Duel(DuelRound::new(ctx, duel_grace, now))),
            Mechanic::ManualTiebreak => Err(MechanicError::InvalidInput(
                "manual-tiebreak is not a round mechanic; confirm a leader instead".to_string(),
            )),
        }
    }

    /// Upper bound on how long play can take before an outcome exists.
    pub(crate) fn expected_duration(&self, question_window: Duration, now: Instant) -> Duration {
        match self {
            RoundPlay::Roulette | RoundPlay::Dice => Duration::ZERO,
            RoundPlay::Quiz(quiz) => {
                question_window * u32::try_from(quiz.question_count()).unwrap_or(u32::MAX)
            }
            RoundPlay::Duel(duel) => duel.auto_end_at().saturating_duration_since(now),
        }
    }

    fn mechanic(&self) -> &dyn SelectionMechanic {
        match self {
            RoundPlay::Roulette => &Roulette as &dyn SelectionMechanic,
            RoundPlay::Dice => &Dice as &dyn SelectionMechanic,
            RoundPlay::Quiz(quiz) => quiz as &dyn SelectionMechanic,
            RoundPlay::Duel(duel) => duel as &dyn SelectionMechanic,
        }
    }
}

pub(crate) struct ActiveRound {
    pub(crate) round_id: RoundId,
    pub(crate) mechanic: Mechanic,
    pub(crate) owner: ParticipantId,
    pub(crate) phase: RoundPhase,
    pub(crate) candidates: Vec<CandidateId>,
    pub(crate) ctx: RoundContext,
    pub(crate) play: RoundPlay,
    pub(crate) outcome: Option<MechanicOutcome>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) opened_at: Instant,
    pub(crate) lease: RoundLease,
    pub(crate) lease_deadline: Instant,
}

impl ActiveRound {
    pub(crate) fn contains(&self, candidate_id: CandidateId) -> bool {
        self.candidates.contains(&candidate_id)
    }

    /// Leave `Starting`. Instant mechanics draw their outcome here.
    pub(crate) fn begin(&mut self) -> Result<(), MechanicError> {
        match self.play {
            RoundPlay::Roulette | RoundPlay::Dice => {
                self.finish()?;
            }
            RoundPlay::Quiz(_) | RoundPlay::Duel(_) => self.phase = RoundPhase::Running,
        }
        Ok(())
    }

    /// Run the mechanic over the snapshot and move to `Finishing`.
    pub(crate) fn finish(&mut self) -> Result<&MechanicOutcome, MechanicError> {
        let outcome = self.play.mechanic().run(&self.candidates, &mut self.ctx)?;
        self.phase = RoundPhase::Finishing;
        let outcome: &MechanicOutcome = self.outcome.insert(outcome);
        Ok(outcome)
    }

    /// Earliest instant at which the actor must act on this round.
    pub(crate) fn next_deadline(&self) -> Instant {
        let play_deadline = match (&self.phase, &self.play) {
            (RoundPhase::Running, RoundPlay::Quiz(quiz)) => quiz.deadline(),
            (RoundPhase::Running, RoundPlay::Duel(duel)) => Some(duel.auto_end_at()),
            _ => None,
        };
        play_deadline.map_or(self.lease_deadline, |d| d.min(self.lease_deadline))
    }

    pub(crate) fn view(&self, now: Instant) -> RoundView {
        let detail = match &self.play {
            RoundPlay::Roulette | RoundPlay::Dice => RoundDetail::Instant {
                outcome: self.outcome.clone(),
            },
            RoundPlay::Quiz(quiz) => RoundDetail::SpeedQuiz {
                question: quiz.current_view(),
                closes_at: quiz.deadline().map(|d| wall_clock(d, now)),
                answers: quiz.total_answers(),
                outcome: self.outcome.clone(),
            },
            RoundPlay::Duel(duel) => RoundDetail::TimingDuel {
                target_ms: duel.target_ms(),
                auto_end_at: wall_clock(duel.auto_end_at(), now),
                submitted: duel.entries().len(),
                outcome: self.outcome.clone(),
            },
        };

        RoundView {
            round_id: self.round_id,
            mechanic: self.mechanic,
            owner: self.owner,
            phase: self.phase,
            candidates: self.candidates.clone(),
            started_at: self.started_at,
            lease_expires_at: self.lease.expires_at,
            detail,
        }
    }
}

/// Translate a timer instant into wall-clock time for clients.
pub(crate) fn wall_clock(at: Instant, now: Instant) -> DateTime<Utc> {
    let ahead = chrono::Duration::from_std(at.saturating_duration_since(now))
        .unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + ahead
}

/// How a finished round ended, kept briefly so late calls get a precise
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoundEnding {
    Recorded,
    Cancelled,
    Aborted,
    Expired,
}

impl RoundEnding {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RoundEnding::Recorded => "recorded",
            RoundEnding::Cancelled => "cancelled",
            RoundEnding::Aborted => "aborted",
            RoundEnding::Expired => "expired",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CandidateDraft, CandidateOrigin};
    use common::types::SessionId;

    const WINDOW: Duration = Duration::from_secs(15);
    const GRACE: Duration = Duration::from_secs(5);

    fn candidates(n: usize) -> Vec<Candidate> {
        let session_id = SessionId::new();
        let owner = ParticipantId::new();
        (0..n)
            .map(|i| {
                CandidateDraft {
                    name: format!("Place {i}"),
                    category: "cafe".to_string(),
                    address: format!("{i} Main Street"),
                    rating: None,
                    origin: CandidateOrigin::Manual,
                }
                .into_candidate(session_id, owner)
            })
            .collect()
    }

    fn round(mechanic: Mechanic, pool: &[Candidate], now: Instant) -> ActiveRound {
        let mut ctx = RoundContext::from_seed(7);
        let play = RoundPlay::new(mechanic, pool, &mut ctx, 2, WINDOW, GRACE, now).unwrap();
        ActiveRound {
            round_id: RoundId::new(),
            mechanic,
            owner: ParticipantId::new(),
            phase: RoundPhase::Starting,
            candidates: pool.iter().map(|c| c.id).collect(),
            ctx,
            play,
            outcome: None,
            started_at: Utc::now(),
            opened_at: now,
            lease: RoundLease {
                token: "lease".to_string(),
                expires_at: Utc::now(),
            },
            lease_deadline: now + Duration::from_secs(120),
        }
    }

    #[test]
    fn test_instant_mechanics_finish_on_begin() {
        let pool = candidates(3);
        for mechanic in [Mechanic::Roulette, Mechanic::Dice] {
            let mut round = round(mechanic, &pool, Instant::now());
            round.begin().unwrap();
            assert_eq!(round.phase, RoundPhase::Finishing);
            let winner = round.outcome.as_ref().unwrap().winner;
            assert!(round.contains(winner));
        }
    }

    #[test]
    fn test_interactive_mechanics_run_until_deadline() {
        let pool = candidates(2);
        let now = Instant::now();

        let mut quiz = round(Mechanic::SpeedQuiz, &pool, now);
        quiz.begin().unwrap();
        assert_eq!(quiz.phase, RoundPhase::Running);
        assert!(quiz.outcome.is_none());
        assert_eq!(quiz.next_deadline(), now + WINDOW);

        let mut duel = round(Mechanic::TimingDuel, &pool, now);
        duel.begin().unwrap();
        assert_eq!(duel.phase, RoundPhase::Running);
        assert!(duel.next_deadline() <= now + Duration::from_millis(7_000) + GRACE);
    }

    #[test]
    fn test_lease_deadline_after_finishing() {
        let pool = candidates(2);
        let now = Instant::now();
        let mut round = round(Mechanic::Dice, &pool, now);
        round.begin().unwrap();
        assert_eq!(round.next_deadline(), round.lease_deadline);
    }

    #[test]
    fn test_manual_tiebreak_is_not_playable() {
        let pool = candidates(2);
        let result = RoundPlay::new(
            Mechanic::ManualTiebreak,
            &pool,
            &mut RoundContext::from_seed(1),
            1,
            WINDOW,
            GRACE,
            Instant::now(),
        );
        assert!(matches!(result, Err(MechanicError::InvalidInput(_))));
    }

    #[test]
    fn test_view_serializes_detail_kind() {
        let pool = candidates(2);
        let now = Instant::now();
        let mut round = round(Mechanic::SpeedQuiz, &pool, now);
        round.begin().unwrap();

        let json = serde_json::to_value(round.view(now)).unwrap();
        assert_eq!(json["mechanic"], "speed-quiz");
        assert_eq!(json["phase"], "running");
        assert_eq!(json["detail"]["kind"], "speed-quiz");
        assert_eq!(json["detail"]["question"]["index"], 0);
        assert!(json["detail"].get("outcome").is_none());
    }
}
