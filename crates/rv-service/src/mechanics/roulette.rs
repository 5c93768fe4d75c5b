//! Roulette: equal wheel segments, uniform winner.
//!
//! The landing angle is derived from the winner and only drives the client
//! animation.

use super::{MechanicError, MechanicOutcome, RoundContext, SelectionMechanic, SelectionPayload};
use crate::models::Mechanic;
use common::types::CandidateId;
use rand::Rng;
use serde::{Deserialize, Serialize};

const MIN_FULL_SPINS: u32 = 4;
const MAX_FULL_SPINS: u32 = 7;

/// Spin details for the client animation and the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouletteSpin {
    pub seed: u64,
    pub segment_degrees: f64,
    pub winner_index: usize,
    /// Angle of the pointer inside the wheel, measured from segment 0.
    pub landing_angle_degrees: f64,
    pub full_spins: u32,
    pub total_rotation_degrees: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Roulette;

impl SelectionMechanic for Roulette {
    fn mechanic(&self) -> Mechanic {
        Mechanic::Roulette
    }

    fn run(
        &self,
        candidates: &[CandidateId],
        ctx: &mut RoundContext,
    ) -> Result<MechanicOutcome, MechanicError> {
        if candidates.is_empty() {
            return Err(MechanicError::EmptyPool);
        }

        let seed = ctx.seed();
        let rng = ctx.rng();
        let segment_degrees = 360.0 / candidates.len() as f64;
        let winner_index = rng.gen_range(0..candidates.len());
        let winner = candidates
            .get(winner_index)
            .copied()
            .ok_or(MechanicError::EmptyPool)?;

        // Stay away from segment borders so the pointer visibly lands inside.
        let offset = rng.gen_range(0.1..0.9) * segment_degrees;
        let landing_angle_degrees = winner_index as f64 * segment_degrees + offset;
        let full_spins = rng.gen_range(MIN_FULL_SPINS..=MAX_FULL_SPINS);
        let total_rotation_degrees = f64::from(full_spins) * 360.0 + (360.0 - landing_angle_degrees);

        Ok(MechanicOutcome {
            winner,
            payload: SelectionPayload::Roulette(RouletteSpin {
                seed,
                segment_degrees,
                winner_index,
                landing_angle_degrees,
                full_spins,
                total_rotation_degrees,
            }),
        })
    }
}
