//! Per-conversation EMA rollup of the emotional signal.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EMA_CARRY;
use crate::database::EmotionDatabase;
use crate::emotion::{Emotion, PrimaryEmotion};

/// Smoothed per-conversation emotional state. The four tracked category
/// scores and `avg_intensity` all live in [0,1]; `dominant` is restricted to
/// the tracked categories plus NEUTRAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEmotionState {
    pub conversation_id: String,
    pub dominant: PrimaryEmotion,
    pub sad: f64,
    pub anxious: f64,
    pub angry: f64,
    pub lonely: f64,
    pub avg_intensity: f64,
    pub last_updated_at: DateTime<Utc>,
}

impl ConversationEmotionState {
    fn first(conversation_id: &str, emotion: &Emotion) -> Self {
        let sample = intensity_sample(emotion);
        let mut state = Self {
            conversation_id: conversation_id.to_string(),
            dominant: PrimaryEmotion::Neutral,
            sad: 0.0,
            anxious: 0.0,
            angry: 0.0,
            lonely: 0.0,
            avg_intensity: sample,
            last_updated_at: Utc::now(),
        };
        if let Some(score) = state.tracked_score_mut(emotion.primary) {
            *score = sample;
        }
        state.dominant = state.recompute_dominant(PrimaryEmotion::Neutral);
        state
    }

    fn tracked_score_mut(&mut self, emotion: PrimaryEmotion) -> Option<&mut f64> {
        match emotion {
            PrimaryEmotion::Sad => Some(&mut self.sad),
            PrimaryEmotion::Anxious => Some(&mut self.anxious),
            PrimaryEmotion::Angry => Some(&mut self.angry),
            PrimaryEmotion::Lonely => Some(&mut self.lonely),
            _ => None,
        }
    }

    pub fn tracked_score(&self, emotion: PrimaryEmotion) -> f64 {
        match emotion {
            PrimaryEmotion::Sad => self.sad,
            PrimaryEmotion::Anxious => self.anxious,
            PrimaryEmotion::Angry => self.angry,
            PrimaryEmotion::Lonely => self.lonely,
            _ => 0.0,
        }
    }

    /// Argmax over the four tracked categories only. Seeded with the previous
    /// dominant's score and resolved by strict-greater comparison, so ties
    /// keep the previous label (stability bias) and HOPEFUL/GRATEFUL can
    /// never win regardless of what the long-term profile says.
    fn recompute_dominant(&self, previous: PrimaryEmotion) -> PrimaryEmotion {
        let mut best = previous;
        let mut best_score = self.tracked_score(previous);
        for candidate in [
            PrimaryEmotion::Sad,
            PrimaryEmotion::Anxious,
            PrimaryEmotion::Angry,
            PrimaryEmotion::Lonely,
        ] {
            let score = self.tracked_score(candidate);
            if score > best_score {
                best = candidate;
                best_score = score;
            }
        }
        best
    }
}

fn intensity_sample(emotion: &Emotion) -> f64 {
    f64::from(emotion.intensity) / 5.0
}

/// One EMA step with the system-wide smoothing constant.
pub fn ema(old: f64, sample: f64) -> f64 {
    EMA_CARRY * old + (1.0 - EMA_CARRY) * sample
}

pub struct ConversationAggregator<'a> {
    db: &'a EmotionDatabase,
}

impl<'a> ConversationAggregator<'a> {
    pub fn new(db: &'a EmotionDatabase) -> Self {
        Self { db }
    }

    /// Fold one classified message into the conversation's rolling state.
    ///
    /// Returns `None` for an absent/blank conversation id (a no-op, not an
    /// error). The read-modify-write here takes no lock or transaction:
    /// concurrent updates to the same conversation race and the last writer
    /// wins, which the product accepts.
    pub fn update(
        &self,
        conversation_id: &str,
        emotion: &Emotion,
    ) -> Result<Option<ConversationEmotionState>> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Ok(None);
        }

        let state = match self.db.get_conversation_state(conversation_id)? {
            None => ConversationEmotionState::first(conversation_id, emotion),
            Some(mut state) => {
                let sample = intensity_sample(emotion);
                state.avg_intensity = ema(state.avg_intensity, sample);
                if let Some(score) = state.tracked_score_mut(emotion.primary) {
                    *score = ema(*score, sample);
                }
                let previous = state.dominant;
                state.dominant = state.recompute_dominant(previous);
                state.last_updated_at = Utc::now();
                state
            }
        };

        self.db.save_conversation_state(&state)?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{CultureTag, SeverityLevel};
    use tempfile::TempDir;

    fn temp_db() -> (TempDir, EmotionDatabase) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = EmotionDatabase::new(dir.path().join("agg.db")).expect("db");
        (dir, db)
    }

    fn emotion(primary: PrimaryEmotion, intensity: u8) -> Emotion {
        Emotion::new(
            primary,
            intensity,
            0.8,
            CultureTag::English,
            SeverityLevel::Venting,
            None,
        )
    }

    #[test]
    fn blank_conversation_id_is_a_noop() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        let result = aggregator
            .update("  ", &emotion(PrimaryEmotion::Sad, 4))
            .expect("update");
        assert!(result.is_none());
    }

    #[test]
    fn first_write_seeds_matching_category_only() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        let state = aggregator
            .update("c1", &emotion(PrimaryEmotion::Anxious, 5))
            .expect("update")
            .expect("state");
        assert!((state.anxious - 1.0).abs() < 1e-9);
        assert_eq!(state.sad, 0.0);
        assert_eq!(state.angry, 0.0);
        assert_eq!(state.lonely, 0.0);
        assert!((state.avg_intensity - 1.0).abs() < 1e-9);
        assert_eq!(state.dominant, PrimaryEmotion::Anxious);
    }

    #[test]
    fn subsequent_writes_apply_exact_ema() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        aggregator
            .update("c1", &emotion(PrimaryEmotion::Sad, 5))
            .expect("first");
        let state = aggregator
            .update("c1", &emotion(PrimaryEmotion::Sad, 3))
            .expect("second")
            .expect("state");
        // 0.7 * 1.0 + 0.3 * 0.6
        assert!((state.sad - 0.88).abs() < 1e-9);
        assert!((state.avg_intensity - 0.88).abs() < 1e-9);
    }

    #[test]
    fn repeated_same_sample_converges_toward_it() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        aggregator
            .update("c1", &emotion(PrimaryEmotion::Sad, 5))
            .expect("seed");

        let target = 2.0 / 5.0;
        let mut last_gap = f64::MAX;
        for _ in 0..20 {
            let state = aggregator
                .update("c1", &emotion(PrimaryEmotion::Sad, 2))
                .expect("update")
                .expect("state");
            let gap = (state.sad - target).abs();
            assert!(gap < last_gap);
            last_gap = gap;
        }
        assert!(last_gap < 0.01);
    }

    #[test]
    fn positive_emotions_never_become_dominant() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        aggregator
            .update("c1", &emotion(PrimaryEmotion::Sad, 3))
            .expect("seed");
        for _ in 0..10 {
            let state = aggregator
                .update("c1", &emotion(PrimaryEmotion::Hopeful, 5))
                .expect("update")
                .expect("state");
            assert!(matches!(
                state.dominant,
                PrimaryEmotion::Neutral
                    | PrimaryEmotion::Sad
                    | PrimaryEmotion::Anxious
                    | PrimaryEmotion::Angry
                    | PrimaryEmotion::Lonely
            ));
        }
    }

    #[test]
    fn untracked_emotion_carries_category_scores_forward() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        aggregator
            .update("c1", &emotion(PrimaryEmotion::Lonely, 4))
            .expect("seed");
        let before = db
            .get_conversation_state("c1")
            .expect("load")
            .expect("exists");
        let after = aggregator
            .update("c1", &emotion(PrimaryEmotion::Stressed, 5))
            .expect("update")
            .expect("state");
        assert_eq!(after.lonely, before.lonely);
        assert_eq!(after.sad, before.sad);
        // avg_intensity still moves
        assert!((after.avg_intensity - ema(before.avg_intensity, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn tie_keeps_previous_dominant_label() {
        let (_dir, db) = temp_db();
        let aggregator = ConversationAggregator::new(&db);
        // Seed sad as dominant, then force an exact tie by hand.
        aggregator
            .update("c1", &emotion(PrimaryEmotion::Sad, 5))
            .expect("seed");
        let mut state = db
            .get_conversation_state("c1")
            .expect("load")
            .expect("exists");
        state.anxious = state.sad;
        db.save_conversation_state(&state).expect("save tie");

        // Untracked update leaves both scores equal; dominant must not flip.
        let after = aggregator
            .update("c1", &emotion(PrimaryEmotion::Neutral, 1))
            .expect("update")
            .expect("state");
        assert_eq!(after.dominant, PrimaryEmotion::Sad);
    }
}
