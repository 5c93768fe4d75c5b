//! Dice: one six-sided roll, face `f` picks `candidates[(f - 1) mod n]`.
//!
//! With fewer than six candidates some candidates own more faces than
//! others. The bias is kept and reported through `faces_for_winner`; the
//! fairness index shows it over time.

use super::{MechanicError, MechanicOutcome, RoundContext, SelectionMechanic, SelectionPayload};
use crate::models::Mechanic;
use common::types::CandidateId;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const FACES: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub seed: u64,
    pub face: u8,
    pub candidate_index: usize,
    /// How many of the six faces map to the winner.
    pub faces_for_winner: u8,
}

/// Candidate index selected by `face` in a pool of `pool_size`.
pub fn candidate_for_face(face: u8, pool_size: usize) -> Option<usize> {
    if pool_size == 0 || !(1..=FACES).contains(&face) {
        return None;
    }
    Some(usize::from(face - 1) % pool_size)
}

/// Number of faces that land on `index`.
pub fn faces_for(index: usize, pool_size: usize) -> u8 {
    (1..=FACES)
        .filter(|face| candidate_for_face(*face, pool_size) == Some(index))
        .fold(0, |count, _| count + 1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dice;

impl SelectionMechanic for Dice {
    fn mechanic(&self) -> Mechanic {
        Mechanic::Dice
    }

    fn run(
        &self,
        candidates: &[CandidateId],
        ctx: &mut RoundContext,
    ) -> Result<MechanicOutcome, MechanicError> {
        let seed = ctx.seed();
        let face = ctx.rng().gen_range(1..=FACES);
        let candidate_index =
            candidate_for_face(face, candidates.len()).ok_or(MechanicError::EmptyPool)?;
        let winner = candidates
            .get(candidate_index)
            .copied()
            .ok_or(MechanicError::EmptyPool)?;

        Ok(MechanicOutcome {
            winner,
            payload: SelectionPayload::Dice(DiceRoll {
                seed,
                face,
                candidate_index,
                faces_for_winner: faces_for(candidate_index, candidates.len()),
            }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_four_candidates_faces_one_and_five_pick_first() {
        assert_eq!(candidate_for_face(1, 4), Some(0));
        assert_eq!(candidate_for_face(5, 4), Some(0));
        assert_eq!(candidate_for_face(2, 4), Some(1));
        assert_eq!(candidate_for_face(6, 4), Some(1));
        assert_eq!(candidate_for_face(4, 4), Some(3));
    }

    #[test]
    fn test_bias_is_reported() {
        assert_eq!(faces_for(0, 4), 2);
        assert_eq!(faces_for(1, 4), 2);
        assert_eq!(faces_for(2, 4), 1);
        assert_eq!(faces_for(3, 4), 1);
        assert_eq!(faces_for(0, 6), 1);
        assert_eq!(faces_for(0, 1), 6);
        // More candidates than faces: the tail can never win.
        assert_eq!(faces_for(7, 8), 0);
    }

    #[test]
    fn test_out_of_range_faces() {
        assert_eq!(candidate_for_face(0, 4), None);
        assert_eq!(candidate_for_face(7, 4), None);
        assert_eq!(candidate_for_face(3, 0), None);
    }

    #[test]
    fn test_roll_matches_face_mapping() {
        let candidates: Vec<CandidateId> = (0..4).map(|_| CandidateId::new()).collect();
        for seed in 0..100 {
            let outcome = Dice
                .run(&candidates, &mut RoundContext::from_seed(seed))
                .unwrap();
            let roll = match &outcome.payload {
                SelectionPayload::Dice(roll) => Some(roll),
                _ => None,
            }
            .expect("dice payload");

            assert!((1..=6).contains(&roll.face));
            assert_eq!(
                candidates.get(candidate_for_face(roll.face, 4).unwrap()),
                Some(&outcome.winner)
            );
            assert_eq!(roll.faces_for_winner, faces_for(roll.candidate_index, 4));
            assert_eq!(roll.seed, seed);
        }
    }

    #[test]
    fn test_empty_pool() {
        assert_eq!(
            Dice.run(&[], &mut RoundContext::from_seed(3)).unwrap_err(),
            MechanicError::EmptyPool
        );
    }
}
