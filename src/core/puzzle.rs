//! Quiz puzzle bank
//!
//! A static, versioned list of quiz questions, loaded once at startup and
//! treated as read-only ground truth for answer verification.

use crate::crypto::hash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Number of answers per question
pub const ANSWERS_PER_QUESTION: usize = 4;

/// Puzzle bank errors
#[derive(Error, Debug)]
pub enum PuzzleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Puzzle bank is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Question {0} has correct answer index {1} out of range")]
    AnswerOutOfRange(String, u8),
}

/// One multiple-choice question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question_id: String,
    pub lesson_id: String,
    pub question_text: String,
    pub answers: [String; ANSWERS_PER_QUESTION],
    pub correct_answer_index: u8,
}

/// The full question bank
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PuzzleBank {
    #[serde(default)]
    pub version: u32,
    pub questions: Vec<QuizQuestion>,
}

impl PuzzleBank {
    /// Build a bank from questions, rejecting out-of-range answer indices
    pub fn new(version: u32, questions: Vec<QuizQuestion>) -> Result<Self, PuzzleError> {
        for q in &questions {
            if q.correct_answer_index as usize >= ANSWERS_PER_QUESTION {
                return Err(PuzzleError::AnswerOutOfRange(
                    q.question_id.clone(),
                    q.correct_answer_index,
                ));
            }
        }
        Ok(Self { version, questions })
    }

    /// Load a bank from a JSON file
    pub fn load(path: &Path) -> Result<Self, PuzzleError> {
        let bank: PuzzleBank = serde_json::from_slice(&fs::read(path)?)?;
        let bank = Self::new(bank.version, bank.questions)?;
        log::info!(
            "Loaded puzzle bank v{} with {} questions",
            bank.version,
            bank.questions.len()
        );
        Ok(bank)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Questions belonging to a lesson
    pub fn questions_for_lesson(&self, lesson_id: &str) -> Vec<&QuizQuestion> {
        self.questions
            .iter()
            .filter(|q| q.lesson_id == lesson_id)
            .collect()
    }

    /// Whether `answer` is the correct index of any question at all
    pub fn is_correct_answer_anywhere(&self, answer: u64) -> bool {
        self.questions
            .iter()
            .any(|q| u64::from(q.correct_answer_index) == answer)
    }

    /// Whether `answer` is the correct index of some question of `lesson_id`
    pub fn is_correct_answer_for_lesson(&self, lesson_id: &str, answer: u64) -> bool {
        self.questions
            .iter()
            .any(|q| q.lesson_id == lesson_id && u64::from(q.correct_answer_index) == answer)
    }
}

/// A puzzle offered to a learner, bound to the progress that unlocked it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PuzzleOffer {
    pub question: QuizQuestion,
    pub proof_of_access_hash: String,
}

impl PuzzleOffer {
    /// Content hash of the offered question
    pub fn puzzle_hash(&self) -> String {
        hash(&self.question)
    }
}
