//! Learner rankings derived from confirmed transactions

use crate::core::{Transaction, TransactionType};
use crate::storage::ChainStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Points per distinct completed lesson
pub const POINTS_PER_LESSON: f64 = 10.0;

/// Points per star received
pub const POINTS_PER_STAR: f64 = 5.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub public_key: String,
    /// From the learner's latest CREATE_USER, if any
    pub username: Option<String>,
    pub lessons_completed: usize,
    pub stars: usize,
    pub score_multiplier: f64,
    pub score: f64,
}

#[derive(Default)]
struct Tally {
    username: Option<String>,
    lessons: BTreeSet<String>,
    stars: usize,
}

fn str_field<'a>(tx: &'a Transaction, field: &str) -> Option<&'a str> {
    tx.data.get(field).and_then(Value::as_str)
}

/// Rank every learner seen on chain, highest score first
///
/// A progress record counts unless it says `completed: false`. Ties are
/// broken by public key so the order is stable.
pub fn compute_leaderboard(store: &mut ChainStore) -> Vec<LeaderboardEntry> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for height in 0..=store.height().unwrap_or(0) {
        let Some(block) = store.get_block_by_height(height) else {
            continue;
        };
        for tx in &block.transactions {
            match tx.tx_type {
                TransactionType::LessonProgress => {
                    let completed = tx.data.get("completed").and_then(Value::as_bool) != Some(false);
                    if let (true, Some(lesson)) = (completed, tx.lesson_id()) {
                        tallies
                            .entry(tx.public_key.clone())
                            .or_default()
                            .lessons
                            .insert(lesson.to_string());
                    }
                }
                TransactionType::CreateUser => {
                    tallies.entry(tx.public_key.clone()).or_default().username =
                        str_field(tx, "username").map(str::to_string);
                }
                TransactionType::AwardStar => {
                    if let Some(recipient) = str_field(tx, "recipientPublicKey") {
                        tallies.entry(recipient.to_string()).or_default().stars += 1;
                    }
                }
                TransactionType::SetBookmark | TransactionType::PaceUpdate => {}
            }
        }
    }

    let mut entries: Vec<LeaderboardEntry> = tallies
        .into_iter()
        .map(|(public_key, tally)| {
            let score_multiplier = store.get_score_multiplier(&public_key);
            let base = tally.lessons.len() as f64 * POINTS_PER_LESSON
                + tally.stars as f64 * POINTS_PER_STAR;
            LeaderboardEntry {
                username: tally.username,
                lessons_completed: tally.lessons.len(),
                stars: tally.stars,
                score_multiplier,
                score: base * score_multiplier,
                public_key,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.public_key.cmp(&b.public_key))
    });
    entries
}

/// One learner's score on a computed board, zero if absent
pub fn score_for(board: &[LeaderboardEntry], public_key: &str) -> f64 {
    board
        .iter()
        .find(|e| e.public_key == public_key)
        .map(|e| e.score)
        .unwrap_or(0.0)
}
