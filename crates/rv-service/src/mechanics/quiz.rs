//! Speed quiz.
//!
//! One multiple-choice question per candidate. A correct answer scores
//! `100 + max(0, 50 - 10 * elapsed_seconds)`, measured by the server from the
//! moment the question opened; wrong answers score 0. Each participant may
//! answer each question once. A candidate's weight is the sum of the scores
//! on its question, and the winner is a weighted draw over those weights.

use super::{MechanicError, MechanicOutcome, RoundContext, SelectionMechanic, SelectionPayload};
use crate::models::{Candidate, Mechanic};
use common::types::{CandidateId, ParticipantId};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const BASE_POINTS: u32 = 100;
pub const MAX_SPEED_BONUS: u32 = 50;
/// Bonus lost per 100 ms, i.e. 10 points per second.
const BONUS_DECAY_STEP_MS: u128 = 100;
const DISTRACTORS: usize = 3;

const FALLBACK_CATEGORIES: &[&str] = &[
    "cafe",
    "bar",
    "restaurant",
    "park",
    "museum",
    "bakery",
    "cinema",
];
const FALLBACK_STREETS: &[&str] = &[
    "Main Street",
    "Market Street",
    "High Street",
    "Station Road",
    "Harbour Way",
];
const GLYPHS: &[(&str, &str)] = &[
    ("cafe", "☕"),
    ("bar", "🍺"),
    ("restaurant", "🍽"),
    ("park", "🌳"),
    ("museum", "🏛"),
    ("bakery", "🥐"),
    ("cinema", "🎬"),
];
const DEFAULT_GLYPH: &str = "📍";

/// Score for one answer.
pub fn score_answer(correct: bool, elapsed: Duration) -> u32 {
    if !correct {
        return 0;
    }
    let decay = elapsed.as_millis() / BONUS_DECAY_STEP_MS;
    let bonus = u128::from(MAX_SPEED_BONUS).saturating_sub(decay);
    BASE_POINTS + u32::try_from(bonus).unwrap_or(0)
}

fn glyph_for(category: &str) -> &'static str {
    let category = category.to_lowercase();
    GLYPHS
        .iter()
        .find(|(name, _)| category.contains(name))
        .map_or(DEFAULT_GLYPH, |(_, glyph)| glyph)
}

fn street_of(address: &str) -> Option<String> {
    let fragment = address.split(',').next()?.trim();
    // Drop a leading house number: "12 Main Street" -> "Main Street".
    let street = match fragment.split_once(' ') {
        Some((number, rest)) if number.chars().all(|c| c.is_ascii_digit()) => rest.trim(),
        _ => fragment,
    };
    (!street.is_empty()).then(|| street.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    Category,
    AddressFragment,
    Glyph,
}

#[derive(Debug, Clone)]
struct QuizQuestion {
    candidate_id: CandidateId,
    kind: QuestionKind,
    prompt: String,
    options: Vec<String>,
    correct: usize,
}

/// Question as shown to players (without the answer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub index: usize,
    pub count: usize,
    pub candidate_id: CandidateId,
    pub kind: QuestionKind,
    pub prompt: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone)]
struct QuizAnswer {
    participant_id: ParticipantId,
    points: u32,
}

/// Result of a single accepted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredAnswer {
    pub correct: bool,
    pub points: u32,
    pub elapsed_ms: u64,
}

/// Outcome of closing the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizStep {
    pub closed_index: usize,
    pub correct_option: usize,
    /// The next question, or `None` when the quiz is over.
    pub next: Option<QuestionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateWeight {
    pub candidate_id: CandidateId,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub participant_id: ParticipantId,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSummary {
    pub seed: u64,
    pub weights: Vec<CandidateWeight>,
    /// Highest score first.
    pub scoreboard: Vec<PlayerScore>,
    /// True when every answer was wrong and the draw fell back to uniform.
    pub uniform_fallback: bool,
}

/// In-progress quiz state.
#[derive(Debug, Clone)]
pub struct QuizRound {
    questions: Vec<QuizQuestion>,
    answers: Vec<Vec<QuizAnswer>>,
    current: usize,
    opened_at: Instant,
    window: Duration,
    expected_players: usize,
    finished: bool,
}

impl QuizRound {
    /// Build one question per candidate and open the first one at `now`.
    pub fn new(
        candidates: &[Candidate],
        ctx: &mut RoundContext,
        expected_players: usize,
        window: Duration,
        now: Instant,
    ) -> Result<Self, MechanicError> {
        if candidates.is_empty() {
            return Err(MechanicError::EmptyPool);
        }

        let questions: Vec<QuizQuestion> = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| build_question(i, candidate, candidates, ctx.rng()))
            .collect();
        let answers = vec![Vec::new(); questions.len()];

        Ok(Self {
            questions,
            answers,
            current: 0,
            opened_at: now,
            window,
            expected_players: expected_players.max(1),
            finished: false,
        })
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn current_view(&self) -> Option<QuestionView> {
        if self.finished {
            return None;
        }
        self.view(self.current)
    }

    fn view(&self, index: usize) -> Option<QuestionView> {
        let question = self.questions.get(index)?;
        Some(QuestionView {
            index,
            count: self.questions.len(),
            candidate_id: question.candidate_id,
            kind: question.kind,
            prompt: question.prompt.clone(),
            options: question.options.clone(),
        })
    }

    /// When the current question closes on its own.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.finished).then(|| self.opened_at + self.window)
    }

    /// Participants who joined mid-quiz count toward "everyone answered".
    pub fn set_expected_players(&mut self, expected_players: usize) {
        self.expected_players = expected_players.max(1);
    }

    pub fn total_answers(&self) -> usize {
        self.answers.iter().map(Vec::len).sum()
    }

    /// True once every expected player answered the current question.
    pub fn all_answered(&self) -> bool {
        self.answers
            .get(self.current)
            .is_some_and(|answers| answers.len() >= self.expected_players)
    }

    pub fn submit(
        &mut self,
        participant_id: ParticipantId,
        question_index: usize,
        choice: usize,
        now: Instant,
    ) -> Result<ScoredAnswer, MechanicError> {
        if self.finished {
            return Err(MechanicError::Closed("The quiz is over".to_string()));
        }
        if question_index != self.current || now >= self.opened_at + self.window {
            return Err(MechanicError::Closed(format!(
                "Question {question_index} is not open"
            )));
        }

        let question = self
            .questions
            .get(self.current)
            .ok_or_else(|| MechanicError::Closed("The quiz is over".to_string()))?;
        if choice >= question.options.len() {
            return Err(MechanicError::InvalidInput(format!(
                "Choice must be between 0 and {}",
                question.options.len().saturating_sub(1)
            )));
        }
        let correct = choice == question.correct;

        let answers = self
            .answers
            .get_mut(self.current)
            .ok_or_else(|| MechanicError::Closed("The quiz is over".to_string()))?;
        if answers.iter().any(|a| a.participant_id == participant_id) {
            return Err(MechanicError::Duplicate(
                "Already answered this question".to_string(),
            ));
        }

        let elapsed = now.saturating_duration_since(self.opened_at);
        let points = score_answer(correct, elapsed);
        answers.push(QuizAnswer {
            participant_id,
            points,
        });

        Ok(ScoredAnswer {
            correct,
            points,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Close the current question and open the next one at `now`.
    pub fn advance(&mut self, now: Instant) -> Option<QuizStep> {
        if self.finished {
            return None;
        }

        let closed_index = self.current;
        let correct_option = self.questions.get(closed_index).map_or(0, |q| q.correct);

        if closed_index + 1 >= self.questions.len() {
            self.finished = true;
        } else {
            self.current = closed_index + 1;
            self.opened_at = now;
        }

        Some(QuizStep {
            closed_index,
            correct_option,
            next: self.current_view(),
        })
    }

    fn weights(&self) -> Vec<CandidateWeight> {
        self.questions
            .iter()
            .zip(&self.answers)
            .map(|(question, answers)| CandidateWeight {
                candidate_id: question.candidate_id,
                weight: answers.iter().map(|a| a.points).sum(),
            })
            .collect()
    }

    fn scoreboard(&self) -> Vec<PlayerScore> {
        let mut totals: HashMap<ParticipantId, u32> = HashMap::new();
        for answer in self.answers.iter().flatten() {
            *totals.entry(answer.participant_id).or_default() += answer.points;
        }
        let mut scoreboard: Vec<PlayerScore> = totals
            .into_iter()
            .map(|(participant_id, points)| PlayerScore {
                participant_id,
                points,
            })
            .collect();
        scoreboard.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        scoreboard
    }
}

impl SelectionMechanic for QuizRound {
    fn mechanic(&self) -> Mechanic {
        Mechanic::SpeedQuiz
    }

    /// Weighted draw over the questions' candidates. `candidates` restricts
    /// the draw to candidates still in the pool.
    fn run(
        &self,
        candidates: &[CandidateId],
        ctx: &mut RoundContext,
    ) -> Result<MechanicOutcome, MechanicError> {
        if self.total_answers() == 0 {
            return Err(MechanicError::NoParticipation(
                "No quiz answers were submitted".to_string(),
            ));
        }

        let weights: Vec<CandidateWeight> = self
            .weights()
            .into_iter()
            .filter(|w| candidates.contains(&w.candidate_id))
            .collect();
        if weights.is_empty() {
            return Err(MechanicError::EmptyPool);
        }

        let seed = ctx.seed();
        let rng = ctx.rng();
        let uniform_fallback = weights.iter().all(|w| w.weight == 0);
        let index = if uniform_fallback {
            rng.gen_range(0..weights.len())
        } else {
            WeightedIndex::new(weights.iter().map(|w| w.weight))
                .map_err(|e| MechanicError::InvalidInput(e.to_string()))?
                .sample(rng)
        };
        let winner = weights
            .get(index)
            .map(|w| w.candidate_id)
            .ok_or(MechanicError::EmptyPool)?;

        Ok(MechanicOutcome {
            winner,
            payload: SelectionPayload::SpeedQuiz(QuizSummary {
                seed,
                weights,
                scoreboard: self.scoreboard(),
                uniform_fallback,
            }),
        })
    }
}

fn build_question<R: Rng>(
    index: usize,
    candidate: &Candidate,
    pool: &[Candidate],
    rng: &mut R,
) -> QuizQuestion {
    let others = pool.iter().filter(|c| c.id != candidate.id);

    let preferred = match index % 3 {
        0 => QuestionKind::Category,
        1 => QuestionKind::AddressFragment,
        _ => QuestionKind::Glyph,
    };
    let street = street_of(&candidate.address);
    let kind = match (preferred, &street) {
        (QuestionKind::AddressFragment, None) => QuestionKind::Category,
        (kind, _) => kind,
    };

    let (prompt, correct_text, mut distractors): (String, String, Vec<String>) = match kind {
        QuestionKind::Category => {
            let correct = if candidate.category.is_empty() {
                "place".to_string()
            } else {
                candidate.category.to_lowercase()
            };
            let pool_values = others.map(|c| c.category.to_lowercase());
            let fallback = FALLBACK_CATEGORIES.iter().map(|s| (*s).to_string());
            (
                format!("What kind of place is {}?", candidate.name),
                correct.clone(),
                distinct_excluding(pool_values.chain(fallback), &correct),
            )
        }
        QuestionKind::AddressFragment => {
            let correct = street.unwrap_or_default();
            let pool_values = others.filter_map(|c| street_of(&c.address));
            let fallback = FALLBACK_STREETS.iter().map(|s| (*s).to_string());
            (
                format!("Which street is {} on?", candidate.name),
                correct.clone(),
                distinct_excluding(pool_values.chain(fallback), &correct),
            )
        }
        QuestionKind::Glyph => {
            let correct = glyph_for(&candidate.category).to_string();
            let all = GLYPHS
                .iter()
                .map(|(_, glyph)| (*glyph).to_string())
                .chain(std::iter::once(DEFAULT_GLYPH.to_string()));
            (
                format!("Which symbol fits {}?", candidate.name),
                correct.clone(),
                distinct_excluding(all, &correct),
            )
        }
    };

    distractors.shuffle(rng);
    distractors.truncate(DISTRACTORS);
    let mut options = distractors;
    options.push(correct_text.clone());
    options.shuffle(rng);
    let correct = options
        .iter()
        .position(|option| *option == correct_text)
        .unwrap_or(0);

    QuizQuestion {
        candidate_id: candidate.id,
        kind,
        prompt,
        options,
        correct,
    }
}

fn distinct_excluding(values: impl Iterator<Item = String>, excluded: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !value.is_empty() && value != excluded && !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CandidateDraft, CandidateOrigin};
    use common::types::SessionId;

    const WINDOW: Duration = Duration::from_secs(15);

    fn pool() -> Vec<Candidate> {
        let session_id = SessionId::new();
        [
            ("Blue Bottle", "cafe", "12 Market Street, Springfield"),
            ("The Anchor", "bar", "3 Harbour Way"),
            ("Green Fields", "park", ""),
        ]
        .into_iter()
        .map(|(name, category, address)| {
            CandidateDraft {
                name: name.to_string(),
                category: category.to_string(),
                address: address.to_string(),
                rating: None,
                origin: CandidateOrigin::Manual,
            }
            .into_candidate(session_id, ParticipantId::new())
        })
        .collect()
    }

    fn correct_choice(quiz: &QuizRound) -> usize {
        quiz.questions.get(quiz.current).unwrap().correct
    }

    #[test]
    fn test_score_answer() {
        assert_eq!(score_answer(false, Duration::ZERO), 0);
        assert_eq!(score_answer(true, Duration::ZERO), 150);
        assert_eq!(score_answer(true, Duration::from_secs(2)), 130);
        assert_eq!(score_answer(true, Duration::from_millis(2500)), 125);
        assert_eq!(score_answer(true, Duration::from_secs(5)), 100);
        assert_eq!(score_answer(true, Duration::from_secs(12)), 100);
    }

    #[test]
    fn test_street_extraction() {
        assert_eq!(
            street_of("12 Market Street, Springfield").as_deref(),
            Some("Market Street")
        );
        assert_eq!(street_of("Harbour Way").as_deref(), Some("Harbour Way"));
        assert_eq!(street_of(""), None);
    }

    #[test]
    fn test_one_question_per_candidate_with_answer_among_options() {
        let candidates = pool();
        let mut ctx = RoundContext::from_seed(7);
        let quiz = QuizRound::new(&candidates, &mut ctx, 2, WINDOW, Instant::now()).unwrap();

        assert_eq!(quiz.question_count(), 3);
        for (question, candidate) in quiz.questions.iter().zip(&candidates) {
            assert_eq!(question.candidate_id, candidate.id);
            assert!(question.options.len() >= 2);
            assert!(question.options.len() <= DISTRACTORS + 1);
            assert!(question.correct < question.options.len());
        }

        // Kinds rotate: category, street, glyph.
        let glyph = quiz.questions.get(2).unwrap();
        assert_eq!(glyph.kind, QuestionKind::Glyph);
        assert_eq!(glyph.options.get(glyph.correct).unwrap(), "🌳");
    }

    #[test]
    fn test_answer_rules() {
        let mut ctx = RoundContext::from_seed(1);
        let start = Instant::now();
        let mut quiz = QuizRound::new(&pool(), &mut ctx, 2, WINDOW, start).unwrap();
        let player = ParticipantId::new();
        let right = correct_choice(&quiz);

        let scored = quiz
            .submit(player, 0, right, start + Duration::from_secs(1))
            .unwrap();
        assert!(scored.correct);
        assert_eq!(scored.points, 140);
        assert_eq!(scored.elapsed_ms, 1000);

        assert!(matches!(
            quiz.submit(player, 0, right, start + Duration::from_secs(2)),
            Err(MechanicError::Duplicate(_))
        ));
        assert!(matches!(
            quiz.submit(ParticipantId::new(), 1, 0, start),
            Err(MechanicError::Closed(_))
        ));
        assert!(matches!(
            quiz.submit(ParticipantId::new(), 0, 99, start),
            Err(MechanicError::InvalidInput(_))
        ));
        assert!(matches!(
            quiz.submit(ParticipantId::new(), 0, right, start + WINDOW),
            Err(MechanicError::Closed(_))
        ));
    }

    #[test]
    fn test_question_closes_when_everyone_answered() {
        let mut ctx = RoundContext::from_seed(2);
        let start = Instant::now();
        let mut quiz = QuizRound::new(&pool(), &mut ctx, 2, WINDOW, start).unwrap();

        quiz.submit(ParticipantId::new(), 0, 0, start).unwrap();
        assert!(!quiz.all_answered());
        quiz.submit(ParticipantId::new(), 0, 1, start).unwrap();
        assert!(quiz.all_answered());
    }

    #[test]
    fn test_advance_walks_every_question() {
        let mut ctx = RoundContext::from_seed(3);
        let start = Instant::now();
        let mut quiz = QuizRound::new(&pool(), &mut ctx, 1, WINDOW, start).unwrap();
        assert_eq!(quiz.deadline(), Some(start + WINDOW));

        let later = start + Duration::from_secs(15);
        let step = quiz.advance(later).unwrap();
        assert_eq!(step.closed_index, 0);
        assert_eq!(step.next.as_ref().map(|q| q.index), Some(1));
        assert_eq!(quiz.deadline(), Some(later + WINDOW));

        quiz.advance(later).unwrap();
        let last = quiz.advance(later).unwrap();
        assert_eq!(last.closed_index, 2);
        assert!(last.next.is_none());
        assert!(quiz.is_finished());
        assert!(quiz.deadline().is_none());
        assert!(quiz.advance(later).is_none());
    }

    #[test]
    fn test_no_answers_cannot_produce_a_winner() {
        let candidates = pool();
        let ids: Vec<CandidateId> = candidates.iter().map(|c| c.id).collect();
        let mut ctx = RoundContext::from_seed(4);
        let quiz = QuizRound::new(&candidates, &mut ctx, 1, WINDOW, Instant::now()).unwrap();

        assert!(matches!(
            quiz.run(&ids, &mut ctx),
            Err(MechanicError::NoParticipation(_))
        ));
    }

    #[test]
    fn test_only_scored_candidate_can_win() {
        let candidates = pool();
        let ids: Vec<CandidateId> = candidates.iter().map(|c| c.id).collect();
        let mut ctx = RoundContext::from_seed(5);
        let start = Instant::now();
        let mut quiz = QuizRound::new(&candidates, &mut ctx, 1, WINDOW, start).unwrap();

        let right = correct_choice(&quiz);
        quiz.submit(ParticipantId::new(), 0, right, start).unwrap();

        let outcome = quiz.run(&ids, &mut ctx).unwrap();
        assert_eq!(Some(&outcome.winner), ids.first());
        let summary = match outcome.payload {
            SelectionPayload::SpeedQuiz(summary) => Some(summary),
            _ => None,
        }
        .unwrap();
        assert!(!summary.uniform_fallback);
        assert_eq!(summary.weights.first().unwrap().weight, 150);
        assert_eq!(summary.scoreboard.len(), 1);
    }

    #[test]
    fn test_all_wrong_answers_fall_back_to_uniform() {
        let candidates = pool();
        let ids: Vec<CandidateId> = candidates.iter().map(|c| c.id).collect();
        let mut ctx = RoundContext::from_seed(6);
        let start = Instant::now();
        let mut quiz = QuizRound::new(&candidates, &mut ctx, 1, WINDOW, start).unwrap();

        let wrong = (correct_choice(&quiz) + 1) % quiz.questions.first().unwrap().options.len();
        quiz.submit(ParticipantId::new(), 0, wrong, start).unwrap();

        let outcome = quiz.run(&ids, &mut ctx).unwrap();
        assert!(ids.contains(&outcome.winner));
        assert!(matches!(
            outcome.payload,
            SelectionPayload::SpeedQuiz(QuizSummary {
                uniform_fallback: true,
                ..
            })
        ));
    }
}
