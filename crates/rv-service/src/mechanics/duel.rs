//! Timing duel.
//!
//! The server samples a target between 1.0 s and 7.0 s in 0.5 s steps and
//! broadcasts `auto_end_at = start + target + grace`. Every participant stops
//! their clock once; the reported stop time is clamped to
//! `[0, server_elapsed + 1 s]`. The smallest distance to the target wins the
//! duel, ties going to the earlier submission. The prize candidate is an
//! independent uniform draw.

use super::{MechanicError, MechanicOutcome, RoundContext, SelectionMechanic, SelectionPayload};
use crate::models::Mechanic;
use common::types::{CandidateId, ParticipantId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

pub const TARGET_MIN_MS: u64 = 1_000;
pub const TARGET_MAX_MS: u64 = 7_000;
pub const TARGET_STEP_MS: u64 = 500;

/// Allowed lead of a client's reported stop over the server clock.
pub const STOP_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelEntry {
    pub participant_id: ParticipantId,
    /// Stop time after clamping.
    pub stop_ms: u64,
    pub distance_ms: u64,
    /// Submission order, 0 for the first.
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelSummary {
    pub seed: u64,
    pub target_ms: u64,
    /// Closest first.
    pub results: Vec<DuelEntry>,
    pub duel_winner: ParticipantId,
}

/// In-progress duel state.
#[derive(Debug, Clone)]
pub struct DuelRound {
    target_ms: u64,
    started_at: Instant,
    auto_end_at: Instant,
    entries: Vec<DuelEntry>,
}

impl DuelRound {
    pub fn new(ctx: &mut RoundContext, grace: Duration, now: Instant) -> Self {
        let steps = (TARGET_MAX_MS - TARGET_MIN_MS) / TARGET_STEP_MS;
        let target_ms = TARGET_MIN_MS + TARGET_STEP_MS * ctx.rng().gen_range(0..=steps);
        Self {
            target_ms,
            started_at: now,
            auto_end_at: now + Duration::from_millis(target_ms) + grace,
            entries: Vec::new(),
        }
    }

    pub fn target_ms(&self) -> u64 {
        self.target_ms
    }

    pub fn auto_end_at(&self) -> Instant {
        self.auto_end_at
    }

    pub fn entries(&self) -> &[DuelEntry] {
        &self.entries
    }

    pub fn submit(
        &mut self,
        participant_id: ParticipantId,
        stop_ms: u64,
        now: Instant,
    ) -> Result<DuelEntry, MechanicError> {
        if now >= self.auto_end_at {
            return Err(MechanicError::Closed("The duel is over".to_string()));
        }
        if self.entries.iter().any(|e| e.participant_id == participant_id) {
            return Err(MechanicError::Duplicate(
                "Already stopped the clock".to_string(),
            ));
        }

        let elapsed = now.saturating_duration_since(self.started_at) + STOP_SLACK;
        let ceiling = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let stop_ms = stop_ms.min(ceiling);

        let entry = DuelEntry {
            participant_id,
            stop_ms,
            distance_ms: stop_ms.abs_diff(self.target_ms),
            order: self.entries.len(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Entries ordered by distance, then submission order.
    pub fn ranking(&self) -> Vec<DuelEntry> {
        let mut ranking = self.entries.clone();
        ranking.sort_by_key(|e| (e.distance_ms, e.order));
        ranking
    }
}

impl SelectionMechanic for DuelRound {
    fn mechanic(&self) -> Mechanic {
        Mechanic::TimingDuel
    }

    fn run(
        &self,
        candidates: &[CandidateId],
        ctx: &mut RoundContext,
    ) -> Result<MechanicOutcome, MechanicError> {
        let results = self.ranking();
        let duel_winner = results
            .first()
            .map(|e| e.participant_id)
            .ok_or_else(|| {
                MechanicError::NoParticipation(
                    "No one stopped the clock before the deadline".to_string(),
                )
            })?;
        if candidates.is_empty() {
            return Err(MechanicError::EmptyPool);
        }

        let seed = ctx.seed();
        let index = ctx.rng().gen_range(0..candidates.len());
        let winner = candidates
            .get(index)
            .copied()
            .ok_or(MechanicError::EmptyPool)?;

        Ok(MechanicOutcome {
            winner,
            payload: SelectionPayload::TimingDuel(DuelSummary {
                seed,
                target_ms: self.target_ms,
                results,
                duel_winner,
            }),
        })
    }
}
