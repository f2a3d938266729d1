//! Mines recurring topic tokens from the user's recent negative-emotion
//! messages so the prompt and response layers can steer around them.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::database::EmotionDatabase;
use crate::emotion::PrimaryEmotion;

/// Minimum per-message intensity for a row to count toward trigger mining.
pub const TRIGGER_MIN_INTENSITY: u8 = 3;
/// How many top-ranked topics survive a mining pass.
pub const TRIGGER_TOP_K: usize = 5;
/// Tokens shorter than this are noise.
const MIN_TOKEN_CHARS: usize = 3;

/// A recurring sensitive topic. `score` is normalized against the
/// top-ranked topic in the batch, so a non-empty result always contains
/// exactly one trigger with score 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub topic: String,
    pub emotion: PrimaryEmotion,
    pub score: f64,
}

const STOP_WORDS_EN: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "you", "are", "was", "but", "not", "have",
    "had", "has", "just", "like", "about", "what", "when", "feel", "feeling", "really",
    "very", "today", "dont", "cant", "its", "been", "because", "from", "they", "them",
    "there", "will", "would", "could", "should", "much", "want", "know", "think", "time",
];

const STOP_WORDS_AR: &[&str] = &[
    "في", "من", "على", "عن", "إلى", "الى", "هذا", "هذه", "ذلك", "أنا", "انا", "أنت",
    "انت", "هو", "هي", "نحن", "كان", "كانت", "لكن", "لقد", "ليس", "مع", "كل", "لا",
    "ما", "لم", "قد", "ان", "أن", "اليوم", "جدا", "أشعر", "اشعر",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS_EN.contains(&token) || STOP_WORDS_AR.contains(&token)
}

/// Unicode-aware tokenization: strip everything that is not a letter or
/// digit, lowercase, drop short tokens and stop words.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !is_stop_word(token))
        .map(|token| token.to_string())
        .collect()
}

fn is_trigger_emotion(emotion: PrimaryEmotion) -> bool {
    matches!(
        emotion,
        PrimaryEmotion::Sad | PrimaryEmotion::Anxious | PrimaryEmotion::Lonely
    )
}

#[derive(Debug, Default)]
struct TokenStats {
    total_weight: f64,
    per_emotion: HashMap<PrimaryEmotion, f64>,
}

impl TokenStats {
    fn best_emotion(&self) -> Option<(PrimaryEmotion, f64)> {
        let mut best: Option<(PrimaryEmotion, f64)> = None;
        // Fixed probe order keeps ranking deterministic across runs.
        for emotion in [
            PrimaryEmotion::Sad,
            PrimaryEmotion::Anxious,
            PrimaryEmotion::Lonely,
        ] {
            if let Some(&weight) = self.per_emotion.get(&emotion) {
                if best.map(|(_, b)| weight > b).unwrap_or(true) {
                    best = Some((emotion, weight));
                }
            }
        }
        best
    }
}

pub struct TriggerMiner<'a> {
    db: &'a EmotionDatabase,
    window_days: i64,
    window_messages: usize,
}

impl<'a> TriggerMiner<'a> {
    pub fn new(db: &'a EmotionDatabase, config: &EngineConfig) -> Self {
        Self {
            db,
            window_days: config.trigger_window_days,
            window_messages: config.trigger_window_messages,
        }
    }

    /// Best-effort trigger detection over the recent negative-emotion window.
    /// Any failure resolves to an empty list at the caller's boundary.
    pub fn detect_triggers(&self, user_id: &str) -> Result<Vec<Trigger>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(Vec::new());
        }

        let since = Utc::now() - ChronoDuration::days(self.window_days);
        let window = self
            .db
            .recent_emotional_messages(user_id, since, self.window_messages)?;

        let mut stats: HashMap<String, TokenStats> = HashMap::new();
        for entry in &window {
            if !is_trigger_emotion(entry.emotion) || entry.intensity < TRIGGER_MIN_INTENSITY {
                continue;
            }
            let weight = f64::from(entry.intensity) / 5.0;
            let mut seen_in_message = HashSet::new();
            for token in tokenize(&entry.message) {
                // A token repeated within one message counts once.
                if !seen_in_message.insert(token.clone()) {
                    continue;
                }
                let token_stats = stats.entry(token).or_default();
                token_stats.total_weight += weight;
                *token_stats.per_emotion.entry(entry.emotion).or_default() += weight;
            }
        }

        let mut ranked: Vec<(String, PrimaryEmotion, f64)> = stats
            .into_iter()
            .filter_map(|(token, token_stats)| {
                token_stats
                    .best_emotion()
                    .map(|(emotion, weight)| (token, emotion, weight))
            })
            .collect();

        // Weight descending, token ascending as the deterministic tie-break.
        ranked.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(TRIGGER_TOP_K);

        let top_weight = match ranked.first() {
            Some((_, _, weight)) if *weight > 0.0 => *weight,
            _ => return Ok(Vec::new()),
        };

        Ok(ranked
            .into_iter()
            .map(|(topic, emotion, weight)| Trigger {
                topic,
                emotion,
                score: weight / top_weight,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::EmotionLogEntry;
    use tempfile::TempDir;

    fn temp_db() -> (TempDir, EmotionDatabase) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = EmotionDatabase::new(dir.path().join("triggers.db")).expect("db");
        (dir, db)
    }

    fn log(db: &EmotionDatabase, emotion: PrimaryEmotion, intensity: u8, message: &str) {
        db.append_emotion_log(&EmotionLogEntry::new("u1", "c1", emotion, intensity, message))
            .expect("append");
    }

    fn miner(db: &EmotionDatabase) -> TriggerMiner<'_> {
        TriggerMiner::new(db, &EngineConfig::default())
    }

    #[test]
    fn empty_history_yields_empty_list() {
        let (_dir, db) = temp_db();
        let triggers = miner(&db).detect_triggers("u1").expect("detect");
        assert!(triggers.is_empty());
    }

    #[test]
    fn top_trigger_is_normalized_to_one() {
        let (_dir, db) = temp_db();
        log(&db, PrimaryEmotion::Sad, 5, "my divorce is crushing me");
        log(&db, PrimaryEmotion::Sad, 4, "thinking of the divorce again");
        log(&db, PrimaryEmotion::Anxious, 3, "work deadlines keep piling");

        let triggers = miner(&db).detect_triggers("u1").expect("detect");
        assert!(!triggers.is_empty());
        let max = triggers
            .iter()
            .map(|t| t.score)
            .fold(f64::MIN, f64::max);
        assert!((max - 1.0).abs() < 1e-9);
        assert_eq!(triggers[0].topic, "divorce");
        assert_eq!(triggers[0].emotion, PrimaryEmotion::Sad);
        assert!(triggers.iter().all(|t| t.score > 0.0 && t.score <= 1.0));
    }

    #[test]
    fn low_intensity_and_wrong_emotion_rows_are_skipped() {
        let (_dir, db) = temp_db();
        log(&db, PrimaryEmotion::Sad, 2, "mildly annoyed about traffic");
        log(&db, PrimaryEmotion::Angry, 5, "furious about traffic");
        log(&db, PrimaryEmotion::Grateful, 5, "thankful despite traffic");

        let triggers = miner(&db).detect_triggers("u1").expect("detect");
        assert!(triggers.is_empty());
    }

    #[test]
    fn stop_words_and_short_tokens_never_rank() {
        let (_dir, db) = temp_db();
        log(&db, PrimaryEmotion::Lonely, 4, "I am so so alone in my flat");

        let triggers = miner(&db).detect_triggers("u1").expect("detect");
        for trigger in &triggers {
            assert!(trigger.topic.chars().count() >= 3);
            assert!(!is_stop_word(&trigger.topic));
        }
        assert!(triggers.iter().any(|t| t.topic == "alone"));
    }

    #[test]
    fn arabic_text_tokenizes_and_filters() {
        let (_dir, db) = temp_db();
        log(&db, PrimaryEmotion::Anxious, 4, "قلق من الامتحان كل ليلة");
        log(&db, PrimaryEmotion::Anxious, 4, "الامتحان يرعبني");

        let triggers = miner(&db).detect_triggers("u1").expect("detect");
        assert_eq!(triggers[0].topic, "الامتحان");
        assert_eq!(triggers[0].emotion, PrimaryEmotion::Anxious);
        assert!((triggers[0].score - 1.0).abs() < 1e-9);
        assert!(triggers.iter().all(|t| t.topic != "من"));
    }

    #[test]
    fn results_cap_at_top_five() {
        let (_dir, db) = temp_db();
        log(
            &db,
            PrimaryEmotion::Sad,
            5,
            "exams rent family health sleep money future career",
        );
        let triggers = miner(&db).detect_triggers("u1").expect("detect");
        assert!(triggers.len() <= TRIGGER_TOP_K);
    }
}
