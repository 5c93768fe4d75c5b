//! PostgreSQL ledger backend.
//!
//! Every write runs in its own transaction. Vote rows cascade with their
//! candidate through `ON DELETE CASCADE`; the remaining vote count is read
//! inside the same transaction before the delete.
//!
//! All queries use parameterized statements.

use super::{LedgerError, LedgerStore};
use crate::mechanics::SelectionPayload;
use crate::models::{
    Candidate, CandidateRemoval, Meeting, MeetingStatus, NewSelectionEvent, Participant,
    SelectionEvent, Tally, Vote, VoteToggle,
};
use common::types::{CandidateId, ParticipantId, SessionId};
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::instrument;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Ledger backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn require_meeting(&self, session_id: SessionId) -> Result<Meeting, LedgerError> {
        self.get_meeting(session_id)
            .await?
            .ok_or_else(LedgerError::session_not_found)
    }
}

fn storage(context: &str, err: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(format!("{context}: {err}"))
}

fn map_meeting(row: &PgRow) -> Result<Meeting, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(Meeting {
        id: SessionId::from(row.try_get::<uuid::Uuid, _>("session_id")?),
        category: row.try_get("category")?,
        status: status
            .parse::<MeetingStatus>()
            .map_err(|e| storage("meetings.status", e))?,
        owner: ParticipantId::from(row.try_get::<uuid::Uuid, _>("owner_participant_id")?),
        created_at: row.try_get("created_at")?,
    })
}

fn map_participant(row: &PgRow) -> Result<Participant, LedgerError> {
    Ok(Participant {
        id: ParticipantId::from(row.try_get::<uuid::Uuid, _>("participant_id")?),
        display_name: row.try_get("display_name")?,
        joined_at: row.try_get("joined_at")?,
    })
}

fn map_candidate(row: &PgRow) -> Result<Candidate, LedgerError> {
    let origin: String = row.try_get("origin")?;
    Ok(Candidate {
        id: CandidateId::from(row.try_get::<uuid::Uuid, _>("candidate_id")?),
        session_id: SessionId::from(row.try_get::<uuid::Uuid, _>("session_id")?),
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        address: row.try_get("address")?,
        rating: row.try_get("rating")?,
        origin: origin
            .parse()
            .map_err(|e| storage("candidates.origin", e))?,
        added_by: ParticipantId::from(row.try_get::<uuid::Uuid, _>("added_by")?),
        created_at: row.try_get("created_at")?,
    })
}

fn map_vote(row: &PgRow) -> Result<Vote, LedgerError> {
    Ok(Vote {
        participant_id: ParticipantId::from(row.try_get::<uuid::Uuid, _>("participant_id")?),
        candidate_id: CandidateId::from(row.try_get::<uuid::Uuid, _>("candidate_id")?),
        cast_at: row.try_get("cast_at")?,
    })
}

fn map_selection_event(row: &PgRow) -> Result<SelectionEvent, LedgerError> {
    let sequence: i64 = row.try_get("sequence")?;
    let mechanic: String = row.try_get("mechanic")?;
    let payload: Json<SelectionPayload> = row.try_get("payload")?;
    let round_id: Option<uuid::Uuid> = row.try_get("round_id")?;

    Ok(SelectionEvent {
        sequence: u64::try_from(sequence).map_err(|e| storage("selection_events.sequence", e))?,
        session_id: SessionId::from(row.try_get::<uuid::Uuid, _>("session_id")?),
        mechanic: mechanic
            .parse()
            .map_err(|e| storage("selection_events.mechanic", e))?,
        winning_candidate_id: CandidateId::from(
            row.try_get::<uuid::Uuid, _>("winning_candidate_id")?,
        ),
        round_id: round_id.map(Into::into),
        recorded_by: ParticipantId::from(row.try_get::<uuid::Uuid, _>("recorded_by")?),
        recorded_at: row.try_get("recorded_at")?,
        payload: payload.0,
    })
}

const SELECT_CANDIDATES: &str = r#"
    SELECT candidate_id, session_id, name, category, address, rating, origin, added_by, created_at
    FROM candidates
    WHERE session_id = $1
    ORDER BY created_at, candidate_id
"#;

const SELECT_VOTES: &str = r#"
    SELECT candidate_id, participant_id, cast_at
    FROM votes
    WHERE session_id = $1
    ORDER BY cast_at, participant_id
"#;

/// Runs on a single connection so a caller's transaction sees its own writes.
async fn load_tally(
    conn: &mut sqlx::PgConnection,
    session_id: SessionId,
) -> Result<Tally, LedgerError> {
    let candidates = sqlx::query(SELECT_CANDIDATES)
        .bind(session_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(map_candidate)
        .collect::<Result<Vec<_>, _>>()?;
    let votes = sqlx::query(SELECT_VOTES)
        .bind(session_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(map_vote)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Tally::from_votes(&candidates, &votes))
}

#[async_trait::async_trait]
impl LedgerStore for PgLedger {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %meeting.id))]
    async fn create_meeting(
        &self,
        meeting: &Meeting,
        owner: &Participant,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO meetings (session_id, category, status, owner_participant_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(meeting.id.as_uuid())
        .bind(&meeting.category)
        .bind(meeting.status.as_str())
        .bind(meeting.owner.as_uuid())
        .bind(meeting.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO participants (session_id, participant_id, display_name, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(meeting.id.as_uuid())
        .bind(owner.id.as_uuid())
        .bind(&owner.display_name)
        .bind(owner.joined_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_meeting(&self, session_id: SessionId) -> Result<Option<Meeting>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, category, status, owner_participant_id, created_at
            FROM meetings
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_meeting).transpose()
    }

    async fn set_meeting_status(
        &self,
        session_id: SessionId,
        status: MeetingStatus,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE meetings SET status = $2 WHERE session_id = $1")
            .bind(session_id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::session_not_found());
        }
        Ok(())
    }

    async fn upsert_participant(
        &self,
        session_id: SessionId,
        participant: &Participant,
    ) -> Result<(), LedgerError> {
        self.require_meeting(session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO participants (session_id, participant_id, display_name, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, participant_id)
            DO UPDATE SET display_name = EXCLUDED.display_name
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(participant.id.as_uuid())
        .bind(&participant.display_name)
        .bind(participant.joined_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_participant(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<Option<Participant>, LedgerError> {
        self.require_meeting(session_id).await?;

        let row = sqlx::query(
            r#"
            SELECT participant_id, display_name, joined_at
            FROM participants
            WHERE session_id = $1 AND participant_id = $2
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(participant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_participant).transpose()
    }

    async fn list_participants(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Participant>, LedgerError> {
        self.require_meeting(session_id).await?;

        sqlx::query(
            r#"
            SELECT participant_id, display_name, joined_at
            FROM participants
            WHERE session_id = $1
            ORDER BY joined_at, participant_id
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_participant)
        .collect()
    }

    async fn put_candidate(&self, candidate: &Candidate) -> Result<(), LedgerError> {
        self.require_meeting(candidate.session_id).await?;

        sqlx::query(
            r#"
            INSERT INTO candidates
                (candidate_id, session_id, name, category, address, rating, origin, added_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (candidate_id) DO UPDATE SET
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                address = EXCLUDED.address,
                rating = EXCLUDED.rating
            "#,
        )
        .bind(candidate.id.as_uuid())
        .bind(candidate.session_id.as_uuid())
        .bind(&candidate.name)
        .bind(&candidate.category)
        .bind(&candidate.address)
        .bind(candidate.rating)
        .bind(candidate.origin.as_str())
        .bind(candidate.added_by.as_uuid())
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_candidates(&self, session_id: SessionId) -> Result<Vec<Candidate>, LedgerError> {
        self.require_meeting(session_id).await?;

        sqlx::query(SELECT_CANDIDATES)
            .bind(session_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_candidate)
            .collect()
    }

    #[instrument(skip_all, fields(session_id = %session_id, candidate_id = %candidate_id))]
    async fn remove_candidate(
        &self,
        session_id: SessionId,
        candidate_id: CandidateId,
        caller: ParticipantId,
    ) -> Result<CandidateRemoval, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let owner: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT owner_participant_id FROM meetings WHERE session_id = $1 FOR UPDATE",
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let owner = owner.ok_or_else(LedgerError::session_not_found)?;
        if owner != caller.as_uuid() {
            return Err(LedgerError::Forbidden(
                "Only the session owner can remove candidates".to_string(),
            ));
        }

        let row = sqlx::query(
            r#"
            SELECT candidate_id, session_id, name, category, address, rating, origin, added_by, created_at
            FROM candidates
            WHERE candidate_id = $1 AND session_id = $2
            FOR UPDATE
            "#,
        )
        .bind(candidate_id.as_uuid())
        .bind(session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let candidate = row
            .as_ref()
            .map(map_candidate)
            .transpose()?
            .ok_or_else(LedgerError::candidate_not_found)?;

        let removed_votes: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE candidate_id = $1")
                .bind(candidate_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM candidates WHERE candidate_id = $1")
            .bind(candidate_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(CandidateRemoval {
            candidate,
            removed_votes: usize::try_from(removed_votes).unwrap_or(0),
        })
    }

    async fn toggle_vote(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        candidate_id: CandidateId,
    ) -> Result<VoteToggle, LedgerError> {
        self.require_meeting(session_id).await?;
        let mut tx = self.pool.begin().await?;

        let exists: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT candidate_id FROM candidates WHERE candidate_id = $1 AND session_id = $2 FOR SHARE",
        )
        .bind(candidate_id.as_uuid())
        .bind(session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(LedgerError::UnknownCandidate);
        }

        let retracted = sqlx::query(
            "DELETE FROM votes WHERE candidate_id = $1 AND participant_id = $2",
        )
        .bind(candidate_id.as_uuid())
        .bind(participant_id.as_uuid())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !retracted {
            sqlx::query(
                r#"
                INSERT INTO votes (candidate_id, participant_id, session_id, cast_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (candidate_id, participant_id) DO NOTHING
                "#,
            )
            .bind(candidate_id.as_uuid())
            .bind(participant_id.as_uuid())
            .bind(session_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        }

        let tally = load_tally(&mut tx, session_id).await?;
        tx.commit().await?;

        Ok(VoteToggle {
            cast: !retracted,
            tally,
        })
    }

    async fn tally(&self, session_id: SessionId) -> Result<Tally, LedgerError> {
        self.require_meeting(session_id).await?;
        let mut conn = self.pool.acquire().await?;
        load_tally(&mut conn, session_id).await
    }

    #[instrument(skip_all, fields(session_id = %event.session_id, mechanic = %event.mechanic))]
    async fn append_selection_event(
        &self,
        event: NewSelectionEvent,
    ) -> Result<SelectionEvent, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT session_id FROM meetings WHERE session_id = $1 FOR UPDATE",
        )
        .bind(event.session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Err(LedgerError::session_not_found());
        }

        let winner: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT candidate_id FROM candidates WHERE candidate_id = $1 AND session_id = $2 FOR SHARE",
        )
        .bind(event.winning_candidate_id.as_uuid())
        .bind(event.session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if winner.is_none() {
            return Err(LedgerError::InvalidReference(
                "Winning candidate no longer exists".to_string(),
            ));
        }

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM selection_events WHERE session_id = $1",
        )
        .bind(event.session_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO selection_events
                (session_id, sequence, mechanic, winning_candidate_id, round_id, recorded_by, recorded_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.session_id.as_uuid())
        .bind(next)
        .bind(event.mechanic.as_str())
        .bind(event.winning_candidate_id.as_uuid())
        .bind(event.round_id.map(|id| id.as_uuid()))
        .bind(event.recorded_by.as_uuid())
        .bind(event.recorded_at)
        .bind(Json(&event.payload))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let sequence = u64::try_from(next).map_err(|e| storage("selection_events.sequence", e))?;
        Ok(event.with_sequence(sequence))
    }

    fn list_selection_history(
        &self,
        session_id: SessionId,
    ) -> BoxStream<'_, Result<SelectionEvent, LedgerError>> {
        let pool = &self.pool;
        stream::once(self.get_meeting(session_id))
            .flat_map(move |meeting| match meeting {
                Ok(Some(_)) => sqlx::query(
                    r#"
                    SELECT session_id, sequence, mechanic, winning_candidate_id, round_id,
                           recorded_by, recorded_at, payload
                    FROM selection_events
                    WHERE session_id = $1
                    ORDER BY sequence DESC
                    "#,
                )
                .bind(session_id.as_uuid())
                .fetch(pool)
                .map(|row| row.map_err(LedgerError::from).and_then(|r| map_selection_event(&r)))
                .boxed(),
                Ok(None) => stream::iter([Err(LedgerError::session_not_found())]).boxed(),
                Err(e) => stream::iter([Err(e)]).boxed(),
            })
            .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Mechanic;
    use chrono::Utc;
    use futures::TryStreamExt;

    async fn seeded(pool: PgPool) -> (PgLedger, Meeting) {
        let ledger = PgLedger::new(pool);
        let owner = Participant {
            id: ParticipantId::new(),
            display_name: "Owner".to_string(),
            joined_at: Utc::now(),
        };
        let meeting = Meeting {
            id: SessionId::new(),
            category: "bar".to_string(),
            status: MeetingStatus::Planning,
            owner: owner.id,
            created_at: Utc::now(),
        };
        ledger.create_meeting(&meeting, &owner).await.unwrap();
        (ledger, meeting)
    }

    fn candidate(meeting: &Meeting, name: &str) -> Candidate {
        crate::models::CandidateDraft {
            name: name.to_string(),
            category: "bar".to_string(),
            address: String::new(),
            rating: Some(4.0),
            origin: crate::models::CandidateOrigin::Imported,
        }
        .into_candidate(meeting.id, meeting.owner)
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_remove_candidate_cascades(pool: PgPool) {
        let (ledger, meeting) = seeded(pool).await;
        let a = candidate(&meeting, "A");
        let b = candidate(&meeting, "B");
        ledger.put_candidate(&a).await.unwrap();
        ledger.put_candidate(&b).await.unwrap();
        for _ in 0..3 {
            ledger
                .toggle_vote(meeting.id, ParticipantId::new(), b.id)
                .await
                .unwrap();
        }
        ledger
            .toggle_vote(meeting.id, ParticipantId::new(), a.id)
            .await
            .unwrap();

        let removal = ledger
            .remove_candidate(meeting.id, b.id, meeting.owner)
            .await
            .unwrap();
        assert_eq!(removal.removed_votes, 3);

        let tally = ledger.tally(meeting.id).await.unwrap();
        assert_eq!(tally.votes_for(a.id), 1);
        assert_eq!(tally.candidates.len(), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_history_round_trips_payload(pool: PgPool) {
        let (ledger, meeting) = seeded(pool).await;
        let a = candidate(&meeting, "A");
        ledger.put_candidate(&a).await.unwrap();

        let stored = ledger
            .append_selection_event(NewSelectionEvent {
                session_id: meeting.id,
                mechanic: Mechanic::ManualTiebreak,
                winning_candidate_id: a.id,
                round_id: None,
                recorded_by: meeting.owner,
                recorded_at: Utc::now(),
                payload: SelectionPayload::ManualTiebreak { tied: vec![a.id] },
            })
            .await
            .unwrap();
        assert_eq!(stored.sequence, 1);

        let history: Vec<SelectionEvent> = ledger
            .list_selection_history(meeting.id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.first().unwrap().payload, stored.payload);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_vote_for_unknown_candidate(pool: PgPool) {
        let (ledger, meeting) = seeded(pool).await;
        let result = ledger
            .toggle_vote(meeting.id, meeting.owner, CandidateId::new())
            .await;
        assert_eq!(result.unwrap_err(), LedgerError::UnknownCandidate);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_toggle_tally_matches_its_own_write(pool: PgPool) {
        let (ledger, meeting) = seeded(pool).await;
        let a = candidate(&meeting, "A");
        ledger.put_candidate(&a).await.unwrap();
        let voter = meeting.owner;

        // Racing toggles on one vote: each reply must describe its own write.
        let toggles = futures::future::join_all(
            (0..8).map(|_| ledger.toggle_vote(meeting.id, voter, a.id)),
        )
        .await;
        for toggle in toggles {
            let toggle = toggle.unwrap();
            let entry = toggle
                .tally
                .candidates
                .iter()
                .find(|entry| entry.candidate_id == a.id)
                .unwrap();
            assert_eq!(entry.voters.contains(&voter), toggle.cast);
        }
    }
}
