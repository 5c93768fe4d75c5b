//! Fairness scorer.
//!
//! Advisory 0-100 index of how evenly past selections spread over the pool.
//! The pool here is every current candidate plus any removed candidate that
//! still has wins in the history.
//!
//! ```text
//! weight_i = count_i + 1
//! mean     = average weight over the pool
//! index    = 100 - min(100, avg(|weight_i - mean| / mean) * 100)
//! ```
//!
//! The `+ 1` prior makes the index sample-size aware: a candidate winning
//! every round lowers the index a little more with each win instead of
//! pinning it at one value. The index is 100 until a second selection exists
//! and whenever all counts are equal.

use crate::models::SelectionEvent;
use common::types::CandidateId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_INDEX: f64 = 100.0;

/// Pseudo-selections added to every candidate before measuring spread.
const PRIOR_SELECTIONS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFairness {
    pub candidate_id: CandidateId,
    pub selections: usize,
    /// Raw selections minus the raw mean over the pool.
    pub deviation_from_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessReport {
    /// One entry per current pool candidate, in pool order.
    pub per_candidate: Vec<CandidateFairness>,
    pub overall_index: f64,
    pub total_selections: usize,
}

/// Score `history` against the current `pool`.
///
/// Winners that have since been removed from the pool still count toward the
/// index.
pub fn score(pool: &[CandidateId], history: &[SelectionEvent]) -> FairnessReport {
    let mut counts: HashMap<CandidateId, usize> = pool.iter().map(|&id| (id, 0)).collect();
    for event in history {
        *counts.entry(event.winning_candidate_id).or_default() += 1;
    }

    let total = history.len();
    let members = counts.len();
    let raw_mean = if members == 0 {
        0.0
    } else {
        total as f64 / members as f64
    };

    let overall_index = if total <= 1 || members == 0 {
        MAX_INDEX
    } else {
        let mean = raw_mean + PRIOR_SELECTIONS;
        let spread = counts
            .values()
            .map(|&count| (count as f64 + PRIOR_SELECTIONS - mean).abs() / mean)
            .sum::<f64>()
            / members as f64;
        MAX_INDEX - (spread * 100.0).min(MAX_INDEX)
    };

    let per_candidate = pool
        .iter()
        .map(|&candidate_id| {
            let selections = counts.get(&candidate_id).copied().unwrap_or(0);
            CandidateFairness {
                candidate_id,
                selections,
                deviation_from_mean: selections as f64 - raw_mean,
            }
        })
        .collect();

    FairnessReport {
        per_candidate,
        overall_index,
        total_selections: total,
    }
}
