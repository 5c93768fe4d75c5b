//! Rendezvous models.
//!
//! Domain records kept in the ledger plus the request/response bodies of the
//! HTTP API.

use crate::actors::{AnswerReceipt, RoundView, StopReceipt};
use crate::auth::RoundLease;
use crate::mechanics::SelectionPayload;
use chrono::{DateTime, Utc};
use common::types::{CandidateId, ParticipantId, RoundId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum participant display name length.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 64;

/// Maximum session category length.
pub const MAX_CATEGORY_LENGTH: usize = 64;

/// Maximum candidate name length.
pub const MAX_CANDIDATE_NAME_LENGTH: usize = 200;

/// Maximum candidate rating (ratings are on a 0-5 scale).
pub const MAX_CANDIDATE_RATING: f32 = 5.0;

/// Error returned when a stored enum value is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

/// Lifecycle of a planning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    /// Participants are still choosing.
    Planning,

    /// The owner closed the session; no more mutations.
    Completed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Planning => "planning",
            MeetingStatus::Completed => "completed",
        }
    }
}

impl FromStr for MeetingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(MeetingStatus::Planning),
            "completed" => Ok(MeetingStatus::Completed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A planning session. The creator is the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: SessionId,
    pub category: String,
    pub status: MeetingStatus,
    pub owner: ParticipantId,
    pub created_at: DateTime<Utc>,
}

/// A member of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateOrigin {
    #[default]
    Manual,
    AiSuggested,
    Imported,
}

impl CandidateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateOrigin::Manual => "manual",
            CandidateOrigin::AiSuggested => "ai-suggested",
            CandidateOrigin::Imported => "imported",
        }
    }
}

impl FromStr for CandidateOrigin {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(CandidateOrigin::Manual),
            "ai-suggested" => Ok(CandidateOrigin::AiSuggested),
            "imported" => Ok(CandidateOrigin::Imported),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A place under consideration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub session_id: SessionId,
    pub name: String,
    pub category: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    pub origin: CandidateOrigin,
    pub added_by: ParticipantId,
    pub created_at: DateTime<Utc>,
}

/// Client-supplied candidate fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDraft {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub origin: CandidateOrigin,
}

impl CandidateDraft {
    /// Check the draft and return a trimmed copy.
    pub fn validated(&self) -> Result<Self, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Candidate name must not be empty".to_string());
        }
        if name.chars().count() > MAX_CANDIDATE_NAME_LENGTH {
            return Err(format!(
                "Candidate name must be at most {MAX_CANDIDATE_NAME_LENGTH} characters"
            ));
        }
        if let Some(rating) = self.rating {
            if !(0.0..=MAX_CANDIDATE_RATING).contains(&rating) {
                return Err(format!(
                    "Candidate rating must be between 0 and {MAX_CANDIDATE_RATING}"
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            category: self.category.trim().to_string(),
            address: self.address.trim().to_string(),
            rating: self.rating,
            origin: self.origin,
        })
    }

    pub fn into_candidate(self, session_id: SessionId, added_by: ParticipantId) -> Candidate {
        Candidate {
            id: CandidateId::new(),
            session_id,
            name: self.name,
            category: self.category,
            address: self.address,
            rating: self.rating,
            origin: self.origin,
            added_by,
            created_at: Utc::now(),
        }
    }
}

/// Check a participant display name and return it trimmed.
pub fn validate_display_name(raw: &str) -> Result<String, String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err("Display name must not be empty".to_string());
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(format!(
            "Display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
        ));
    }
    Ok(name.to_string())
}

/// Check a session category and return it trimmed and lowercased.
pub fn validate_category(raw: &str) -> Result<String, String> {
    let category = raw.trim();
    if category.is_empty() {
        return Err("Category must not be empty".to_string());
    }
    if category.chars().count() > MAX_CATEGORY_LENGTH {
        return Err(format!(
            "Category must be at most {MAX_CATEGORY_LENGTH} characters"
        ));
    }
    Ok(category.to_lowercase())
}

/// One participant's vote for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub participant_id: ParticipantId,
    pub candidate_id: CandidateId,
    pub cast_at: DateTime<Utc>,
}

/// Vote count and voters for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: CandidateId,
    pub votes: usize,
    pub voters: Vec<ParticipantId>,
}

/// Per-candidate vote counts, in candidate creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub candidates: Vec<CandidateTally>,
}

impl Tally {
    /// Build a tally from live vote rows. Candidates without votes get a zero
    /// entry; votes for unknown candidates are ignored.
    pub fn from_votes(candidates: &[Candidate], votes: &[Vote]) -> Self {
        let candidates = candidates
            .iter()
            .map(|candidate| {
                let voters: Vec<ParticipantId> = votes
                    .iter()
                    .filter(|vote| vote.candidate_id == candidate.id)
                    .map(|vote| vote.participant_id)
                    .collect();
                CandidateTally {
                    candidate_id: candidate.id,
                    votes: voters.len(),
                    voters,
                }
            })
            .collect();

        Self { candidates }
    }

    pub fn votes_for(&self, candidate_id: CandidateId) -> usize {
        self.candidates
            .iter()
            .find(|entry| entry.candidate_id == candidate_id)
            .map_or(0, |entry| entry.votes)
    }

    pub fn total_votes(&self) -> usize {
        self.candidates.iter().map(|entry| entry.votes).sum()
    }

    /// Candidates tied for the highest vote count. Empty when nobody voted.
    pub fn leaders(&self) -> Vec<CandidateId> {
        let max = self
            .candidates
            .iter()
            .map(|entry| entry.votes)
            .max()
            .unwrap_or(0);
        if max == 0 {
            return Vec::new();
        }

        self.candidates
            .iter()
            .filter(|entry| entry.votes == max)
            .map(|entry| entry.candidate_id)
            .collect()
    }
}

/// Wire identifiers of the selection mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mechanic {
    Roulette,
    Dice,
    SpeedQuiz,
    TimingDuel,
    ManualTiebreak,
}

impl Mechanic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanic::Roulette => "roulette",
            Mechanic::Dice => "dice",
            Mechanic::SpeedQuiz => "speed-quiz",
            Mechanic::TimingDuel => "timing-duel",
            Mechanic::ManualTiebreak => "manual-tiebreak",
        }
    }
}

impl fmt::Display for Mechanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanic {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roulette" => Ok(Mechanic::Roulette),
            "dice" => Ok(Mechanic::Dice),
            "speed-quiz" => Ok(Mechanic::SpeedQuiz),
            "timing-duel" => Ok(Mechanic::TimingDuel),
            "manual-tiebreak" => Ok(Mechanic::ManualTiebreak),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Immutable audit record of one completed round or tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionEvent {
    pub sequence: u64,
    pub session_id: SessionId,
    pub mechanic: Mechanic,
    pub winning_candidate_id: CandidateId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    pub recorded_by: ParticipantId,
    pub recorded_at: DateTime<Utc>,
    pub payload: SelectionPayload,
}

/// A selection event before the ledger assigns its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSelectionEvent {
    pub session_id: SessionId,
    pub mechanic: Mechanic,
    pub winning_candidate_id: CandidateId,
    pub round_id: Option<RoundId>,
    pub recorded_by: ParticipantId,
    pub recorded_at: DateTime<Utc>,
    pub payload: SelectionPayload,
}

impl NewSelectionEvent {
    pub fn with_sequence(self, sequence: u64) -> SelectionEvent {
        SelectionEvent {
            sequence,
            session_id: self.session_id,
            mechanic: self.mechanic,
            winning_candidate_id: self.winning_candidate_id,
            round_id: self.round_id,
            recorded_by: self.recorded_by,
            recorded_at: self.recorded_at,
            payload: self.payload,
        }
    }
}

/// Result of removing a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRemoval {
    pub candidate: Candidate,
    pub removed_votes: usize,
}

/// Result of toggling a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteToggle {
    /// True when the vote is now cast, false when it was retracted.
    pub cast: bool,
    pub tally: Tally,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,

    /// Ledger backend in use ("memory" or "postgres").
    pub ledger: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_sessions: Option<usize>,
}

// ============================================================================
// Session API Models
// ============================================================================

/// Request body for `POST /api/v1/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// What kind of place the group is looking for ("cafe", "bar", ...).
    pub category: String,

    /// Display name of the creator, who becomes the owner.
    pub display_name: String,
}

/// Response for session creation and join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionJoinedResponse {
    pub session_id: SessionId,
    pub participant: Participant,
    pub owner: ParticipantId,

    /// Bearer token carrying the participant identity.
    pub token: String,
}

/// Request body for join and rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayNameRequest {
    pub display_name: String,
}

/// Response for `DELETE /candidates/:candidate_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRemovedResponse {
    pub candidate_id: CandidateId,
    pub removed_votes: usize,
}

// ============================================================================
// Voting API Models
// ============================================================================

/// Request body for `POST /votes` and `POST /confirm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRequest {
    pub candidate_id: CandidateId,
}

/// Response for `GET /votes/leaders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadersResponse {
    pub leaders: Vec<CandidateId>,
}

// ============================================================================
// Round API Models
// ============================================================================

/// Request body for `POST /rounds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRoundRequest {
    pub mechanic: Mechanic,
}

/// Response for `POST /rounds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRoundResponse {
    pub round: RoundView,

    /// Presented back on `POST /rounds/:round_id/result`.
    pub lease: RoundLease,
}

/// Request body for `POST /rounds/:round_id/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResultRequest {
    pub lease_token: String,

    /// Winner the client displayed; rejected if it differs from the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<CandidateId>,
}

/// Request body for `POST /rounds/:round_id/answers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question_index: usize,
    pub choice: usize,
}

/// Response for `POST /rounds/:round_id/answers`.
pub type AnswerResponse = AnswerReceipt;

/// Request body for `POST /rounds/:round_id/stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    /// Milliseconds since the duel started, as measured by the client.
    pub stop_ms: u64,
}

/// Response for `POST /rounds/:round_id/stop`.
pub type StopResponse = StopReceipt;

/// Query for `GET /history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response for `GET /history`, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub events: Vec<SelectionEvent>,
}
