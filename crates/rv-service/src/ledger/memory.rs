//! In-memory ledger backend.
//!
//! Each session lives behind its own async mutex, so writes to one session
//! are serialized while different sessions proceed in parallel.

use super::{LedgerError, LedgerStore};
use crate::models::{
    Candidate, CandidateRemoval, Meeting, MeetingStatus, NewSelectionEvent, Participant,
    SelectionEvent, Tally, Vote, VoteToggle,
};
use chrono::Utc;
use common::types::{CandidateId, ParticipantId, SessionId};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug)]
struct SessionBook {
    meeting: Meeting,
    participants: Vec<Participant>,
    candidates: Vec<Candidate>,
    votes: Vec<Vote>,
    history: Vec<SelectionEvent>,
}

impl SessionBook {
    fn tally(&self) -> Tally {
        Tally::from_votes(&self.candidates, &self.votes)
    }

    fn has_candidate(&self, candidate_id: CandidateId) -> bool {
        self.candidates.iter().any(|c| c.id == candidate_id)
    }
}

/// Ledger kept entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionBook>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn book(&self, session_id: SessionId) -> Result<Arc<Mutex<SessionBook>>, LedgerError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(LedgerError::session_not_found)
    }

    async fn history_snapshot(&self, session_id: SessionId) -> Vec<Result<SelectionEvent, LedgerError>> {
        match self.book(session_id).await {
            Ok(book) => book
                .lock()
                .await
                .history
                .iter()
                .rev()
                .cloned()
                .map(Ok)
                .collect(),
            Err(e) => vec![Err(e)],
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedger {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn create_meeting(
        &self,
        meeting: &Meeting,
        owner: &Participant,
    ) -> Result<(), LedgerError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&meeting.id) {
            return Err(LedgerError::InvalidReference(
                "Session already exists".to_string(),
            ));
        }

        sessions.insert(
            meeting.id,
            Arc::new(Mutex::new(SessionBook {
                meeting: meeting.clone(),
                participants: vec![owner.clone()],
                candidates: Vec::new(),
                votes: Vec::new(),
                history: Vec::new(),
            })),
        );
        Ok(())
    }

    async fn get_meeting(&self, session_id: SessionId) -> Result<Option<Meeting>, LedgerError> {
        let Some(book) = self.sessions.read().await.get(&session_id).cloned() else {
            return Ok(None);
        };
        let meeting = book.lock().await.meeting.clone();
        Ok(Some(meeting))
    }

    async fn set_meeting_status(
        &self,
        session_id: SessionId,
        status: MeetingStatus,
    ) -> Result<(), LedgerError> {
        let book = self.book(session_id).await?;
        book.lock().await.meeting.status = status;
        Ok(())
    }

    async fn upsert_participant(
        &self,
        session_id: SessionId,
        participant: &Participant,
    ) -> Result<(), LedgerError> {
        let book = self.book(session_id).await?;
        let mut book = book.lock().await;
        match book
            .participants
            .iter_mut()
            .find(|p| p.id == participant.id)
        {
            Some(existing) => existing.display_name = participant.display_name.clone(),
            None => book.participants.push(participant.clone()),
        }
        Ok(())
    }

    async fn get_participant(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<Option<Participant>, LedgerError> {
        let book = self.book(session_id).await?;
        let book = book.lock().await;
        Ok(book
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned())
    }

    async fn list_participants(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Participant>, LedgerError> {
        let book = self.book(session_id).await?;
        let participants = book.lock().await.participants.clone();
        Ok(participants)
    }

    async fn put_candidate(&self, candidate: &Candidate) -> Result<(), LedgerError> {
        let book = self.book(candidate.session_id).await?;
        let mut book = book.lock().await;
        match book.candidates.iter_mut().find(|c| c.id == candidate.id) {
            Some(existing) => *existing = candidate.clone(),
            None => book.candidates.push(candidate.clone()),
        }
        Ok(())
    }

    async fn list_candidates(&self, session_id: SessionId) -> Result<Vec<Candidate>, LedgerError> {
        let book = self.book(session_id).await?;
        let candidates = book.lock().await.candidates.clone();
        Ok(candidates)
    }

    async fn remove_candidate(
        &self,
        session_id: SessionId,
        candidate_id: CandidateId,
        caller: ParticipantId,
    ) -> Result<CandidateRemoval, LedgerError> {
        let book = self.book(session_id).await?;
        let mut book = book.lock().await;

        if book.meeting.owner != caller {
            return Err(LedgerError::Forbidden(
                "Only the session owner can remove candidates".to_string(),
            ));
        }

        let position = book
            .candidates
            .iter()
            .position(|c| c.id == candidate_id)
            .ok_or_else(LedgerError::candidate_not_found)?;
        let candidate = book.candidates.remove(position);

        let before = book.votes.len();
        book.votes.retain(|vote| vote.candidate_id != candidate_id);
        let removed_votes = before - book.votes.len();

        Ok(CandidateRemoval {
            candidate,
            removed_votes,
        })
    }

    async fn toggle_vote(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<VoteToggle, LedgerError> {
        let book = self.book(session_id).await?;
        let mut book = book.lock().await;

        if !book.has_candidate(candidate_id) {
            return Err(LedgerError::UnknownCandidate);
        }

        let existing = book
            .votes
            .iter()
            .position(|v| v.candidate_id == candidate_id && v.participant_id == participant_id);
        let cast = match existing {
            Some(index) => {
                book.votes.remove(index);
                false
            }
            None => {
                book.votes.push(Vote {
                    participant_id,
                    candidate_id,
                    cast_at: Utc::now(),
                });
                true
            }
        };

        Ok(VoteToggle {
            cast,
            tally: book.tally(),
        })
    }

    async fn tally(&self, session_id: SessionId) -> Result<Tally, LedgerError> {
        let book = self.book(session_id).await?;
        let tally = book.lock().await.tally();
        Ok(tally)
    }

    async fn append_selection_event(
        &self,
        event: NewSelectionEvent,
    ) -> Result<SelectionEvent, LedgerError> {
        let book = self.book(event.session_id).await?;
        let mut book = book.lock().await;

        if !book.has_candidate(event.winning_candidate_id) {
            return Err(LedgerError::InvalidReference(
                "Winning candidate no longer exists".to_string(),
            ));
        }

        let sequence = book.history.last().map_or(1, |last| last.sequence + 1);
        let stored = event.with_sequence(sequence);
        book.history.push(stored.clone());
        Ok(stored)
    }

    fn list_selection_history(
        &self,
        session_id: SessionId,
    ) -> BoxStream<'_, Result<SelectionEvent, LedgerError>> {
        stream::once(self.history_snapshot(session_id))
            .flat_map(stream::iter)
            .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mechanics::SelectionPayload;
    use crate::models::{CandidateDraft, CandidateOrigin, Mechanic};
    use futures::TryStreamExt;

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        session_id: SessionId,
        owner: ParticipantId,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = Participant {
            id: ParticipantId::new(),
            display_name: "Owner".to_string(),
            joined_at: Utc::now(),
        };
        let meeting = Meeting {
            id: SessionId::new(),
            category: "cafe".to_string(),
            status: MeetingStatus::Planning,
            owner: owner.id,
            created_at: Utc::now(),
        };
        ledger.create_meeting(&meeting, &owner).await.unwrap();
        Fixture {
            ledger,
            session_id: meeting.id,
            owner: owner.id,
        }
    }

    async fn add_candidate(f: &Fixture, name: &str) -> CandidateId {
        let candidate = CandidateDraft {
            name: name.to_string(),
            category: "cafe".to_string(),
            address: String::new(),
            rating: None,
            origin: CandidateOrigin::Manual,
        }
        .into_candidate(f.session_id, f.owner);
        f.ledger.put_candidate(&candidate).await.unwrap();
        candidate.id
    }

    fn tiebreak(f: &Fixture, winner: CandidateId) -> NewSelectionEvent {
        NewSelectionEvent {
            session_id: f.session_id,
            mechanic: Mechanic::ManualTiebreak,
            winning_candidate_id: winner,
            round_id: None,
            recorded_by: f.owner,
            recorded_at: Utc::now(),
            payload: SelectionPayload::ManualTiebreak { tied: vec![winner] },
        }
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_tally() {
        let f = fixture().await;
        let a = add_candidate(&f, "A").await;
        let voter = ParticipantId::new();

        let first = f.ledger.toggle_vote(f.session_id, voter, a).await.unwrap();
        assert!(first.cast);
        assert_eq!(first.tally.votes_for(a), 1);

        let second = f.ledger.toggle_vote(f.session_id, voter, a).await.unwrap();
        assert!(!second.cast);
        assert_eq!(second.tally.votes_for(a), 0);
    }

    #[tokio::test]
    async fn test_concurrent_votes_are_not_lost() {
        let f = fixture().await;
        let a = add_candidate(&f, "A").await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&f.ledger);
            let session_id = f.session_id;
            tasks.push(tokio::spawn(async move {
                ledger
                    .toggle_vote(session_id, ParticipantId::new(), a)
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(f.ledger.tally(f.session_id).await.unwrap().votes_for(a), 20);
    }

    #[tokio::test]
    async fn test_vote_for_unknown_candidate() {
        let f = fixture().await;
        add_candidate(&f, "A").await;
        let result = f
            .ledger
            .toggle_vote(f.session_id, f.owner, CandidateId::new())
            .await;
        assert_eq!(result.unwrap_err(), LedgerError::UnknownCandidate);
    }

    #[tokio::test]
    async fn test_remove_candidate_cascades_votes() {
        let f = fixture().await;
        let a = add_candidate(&f, "A").await;
        let b = add_candidate(&f, "B").await;
        for _ in 0..3 {
            f.ledger
                .toggle_vote(f.session_id, ParticipantId::new(), b)
                .await
                .unwrap();
        }
        f.ledger
            .toggle_vote(f.session_id, ParticipantId::new(), a)
            .await
            .unwrap();

        let removal = f
            .ledger
            .remove_candidate(f.session_id, b, f.owner)
            .await
            .unwrap();
        assert_eq!(removal.removed_votes, 3);
        assert_eq!(removal.candidate.id, b);

        let tally = f.ledger.tally(f.session_id).await.unwrap();
        assert_eq!(tally.candidates.len(), 1);
        assert_eq!(tally.votes_for(a), 1);
    }

    #[tokio::test]
    async fn test_remove_candidate_requires_owner() {
        let f = fixture().await;
        let a = add_candidate(&f, "A").await;
        let result = f
            .ledger
            .remove_candidate(f.session_id, a, ParticipantId::new())
            .await;
        assert!(matches!(result, Err(LedgerError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_remove_unknown_candidate() {
        let f = fixture().await;
        let result = f
            .ledger
            .remove_candidate(f.session_id, CandidateId::new(), f.owner)
            .await;
        assert_eq!(result.unwrap_err(), LedgerError::candidate_not_found());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_restartable() {
        let f = fixture().await;
        let a = add_candidate(&f, "A").await;
        let b = add_candidate(&f, "B").await;

        let first = f.ledger.append_selection_event(tiebreak(&f, a)).await.unwrap();
        let second = f.ledger.append_selection_event(tiebreak(&f, b)).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        for _ in 0..2 {
            let history: Vec<SelectionEvent> = f
                .ledger
                .list_selection_history(f.session_id)
                .try_collect()
                .await
                .unwrap();
            let winners: Vec<CandidateId> =
                history.iter().map(|e| e.winning_candidate_id).collect();
            assert_eq!(winners, vec![b, a]);
        }
    }

    #[tokio::test]
    async fn test_append_rejects_removed_winner() {
        let f = fixture().await;
        let a = add_candidate(&f, "A").await;
        f.ledger
            .remove_candidate(f.session_id, a, f.owner)
            .await
            .unwrap();

        let result = f.ledger.append_selection_event(tiebreak(&f, a)).await;
        assert!(matches!(result, Err(LedgerError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let ledger = InMemoryLedger::new();
        let missing = SessionId::new();

        assert!(ledger.get_meeting(missing).await.unwrap().is_none());
        assert_eq!(
            ledger.tally(missing).await.unwrap_err(),
            LedgerError::session_not_found()
        );

        let items: Vec<_> = ledger.list_selection_history(missing).collect().await;
        assert_eq!(items, vec![Err(LedgerError::session_not_found())]);
    }

    #[tokio::test]
    async fn test_upsert_participant_renames() {
        let f = fixture().await;
        let mut owner = f
            .ledger
            .get_participant(f.session_id, f.owner)
            .await
            .unwrap()
            .unwrap();
        owner.display_name = "Renamed".to_string();
        f.ledger
            .upsert_participant(f.session_id, &owner)
            .await
            .unwrap();

        let participants = f.ledger.list_participants(f.session_id).await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants.first().unwrap().display_name, "Renamed");
    }
}
