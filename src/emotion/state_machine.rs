//! Per-conversation tone state machine. A steady-state regulator, not a
//! workflow: no terminal state, and a hysteresis rule keeps noisy one-turn
//! signals from flapping the tone.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::EmotionDatabase;
use crate::emotion::profile::UserEmotionProfile;
use crate::emotion::{Emotion, PrimaryEmotion, SeverityLevel};

/// Consecutive sub-2-intensity turns required before the tone heals back to
/// neutral.
pub const LOW_INTENSITY_HEAL_STREAK: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Neutral,
    SadSupport,
    AnxietyCalming,
    AngerDeescalate,
    LonelyCompanionship,
    HopeGuidance,
}

impl ConversationState {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ConversationState::Neutral => "neutral",
            ConversationState::SadSupport => "sad_support",
            ConversationState::AnxietyCalming => "anxiety_calming",
            ConversationState::AngerDeescalate => "anger_deescalate",
            ConversationState::LonelyCompanionship => "lonely_companionship",
            ConversationState::HopeGuidance => "hope_guidance",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sad_support" => ConversationState::SadSupport,
            "anxiety_calming" => ConversationState::AnxietyCalming,
            "anger_deescalate" => ConversationState::AngerDeescalate,
            "lonely_companionship" => ConversationState::LonelyCompanionship,
            "hope_guidance" => ConversationState::HopeGuidance,
            _ => ConversationState::Neutral,
        }
    }

    /// The four states that wrap the user in active emotional support.
    pub fn is_support_state(self) -> bool {
        matches!(
            self,
            ConversationState::SadSupport
                | ConversationState::AnxietyCalming
                | ConversationState::AngerDeescalate
                | ConversationState::LonelyCompanionship
        )
    }
}

/// Persisted row backing the state machine, one per conversation, created
/// lazily on the first emotion update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationToneRecord {
    pub conversation_id: String,
    pub current_state: ConversationState,
    pub last_emotion: PrimaryEmotion,
    pub low_intensity_streak: u32,
    pub last_updated_at: DateTime<Utc>,
}

impl ConversationToneRecord {
    fn initial(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            current_state: ConversationState::Neutral,
            last_emotion: PrimaryEmotion::Neutral,
            low_intensity_streak: 0,
            last_updated_at: Utc::now(),
        }
    }
}

fn emotion_to_state(emotion: PrimaryEmotion) -> Option<ConversationState> {
    match emotion {
        PrimaryEmotion::Angry => Some(ConversationState::AngerDeescalate),
        PrimaryEmotion::Anxious | PrimaryEmotion::Stressed => {
            Some(ConversationState::AnxietyCalming)
        }
        PrimaryEmotion::Sad => Some(ConversationState::SadSupport),
        PrimaryEmotion::Lonely => Some(ConversationState::LonelyCompanionship),
        _ => None,
    }
}

/// Pure transition function. Returns the next state and the updated
/// low-intensity streak.
pub fn next_state(
    current: ConversationState,
    streak: u32,
    emotion: &Emotion,
    long_term: Option<&UserEmotionProfile>,
) -> (ConversationState, u32) {
    let streak = if emotion.intensity < 2 { streak + 1 } else { 0 };

    // Hysteresis: only three consecutive calm turns heal the tone, and
    // nothing (including the hope override below) outranks the forced
    // neutral once they accrue.
    if streak >= LOW_INTENSITY_HEAL_STREAK {
        return (ConversationState::Neutral, streak);
    }

    let mapped = emotion_to_state(emotion.primary);
    let mut state = match emotion.severity {
        SeverityLevel::Casual => ConversationState::Neutral,
        SeverityLevel::Venting => mapped.unwrap_or(ConversationState::Neutral),
        // Support falls back to the previous state rather than neutral.
        SeverityLevel::Support => mapped.unwrap_or(current),
        // The crisis tier never silently downgrades to neutral.
        SeverityLevel::HighRisk => mapped.unwrap_or({
            if current == ConversationState::Neutral {
                ConversationState::SadSupport
            } else {
                current
            }
        }),
    };

    // Positive-leaning turns steer toward guidance regardless of severity.
    if emotion.primary.is_positive() || long_term.map(|p| p.leans_positive()).unwrap_or(false) {
        state = ConversationState::HopeGuidance;
    }

    (state, streak)
}

pub struct ConversationStateMachine<'a> {
    db: &'a EmotionDatabase,
}

impl<'a> ConversationStateMachine<'a> {
    pub fn new(db: &'a EmotionDatabase) -> Self {
        Self { db }
    }

    /// Apply one emotion update and persist the resulting record.
    pub fn update(
        &self,
        conversation_id: &str,
        emotion: &Emotion,
        long_term: Option<&UserEmotionProfile>,
    ) -> Result<ConversationToneRecord> {
        let mut record = self
            .db
            .get_tone_record(conversation_id)?
            .unwrap_or_else(|| ConversationToneRecord::initial(conversation_id));

        let (state, streak) = next_state(
            record.current_state,
            record.low_intensity_streak,
            emotion,
            long_term,
        );
        record.current_state = state;
        record.low_intensity_streak = streak;
        record.last_emotion = emotion.primary;
        record.last_updated_at = Utc::now();

        self.db.save_tone_record(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::CultureTag;
    use tempfile::TempDir;

    fn emotion(primary: PrimaryEmotion, intensity: u8, severity: SeverityLevel) -> Emotion {
        Emotion::new(primary, intensity, 0.8, CultureTag::English, severity, None)
    }

    fn temp_db() -> (TempDir, EmotionDatabase) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = EmotionDatabase::new(dir.path().join("tone.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn three_calm_turns_force_neutral_from_any_state() {
        let mut state = ConversationState::AngerDeescalate;
        let mut streak = 0;
        for turn in 0..3 {
            let calm = emotion(PrimaryEmotion::Angry, 1, SeverityLevel::Support);
            let (next, next_streak) = next_state(state, streak, &calm, None);
            state = next;
            streak = next_streak;
            if turn < 2 {
                // Support severity keeps the anger state until the streak lands.
                assert_eq!(state, ConversationState::AngerDeescalate);
            }
        }
        assert_eq!(state, ConversationState::Neutral);
        assert_eq!(streak, 3);
    }

    #[test]
    fn high_intensity_turn_resets_the_streak() {
        let calm = emotion(PrimaryEmotion::Sad, 1, SeverityLevel::Venting);
        let (_, streak) = next_state(ConversationState::Neutral, 1, &calm, None);
        assert_eq!(streak, 2);

        let loud = emotion(PrimaryEmotion::Sad, 4, SeverityLevel::Venting);
        let (_, streak) = next_state(ConversationState::Neutral, 2, &loud, None);
        assert_eq!(streak, 0);
    }

    #[test]
    fn casual_severity_goes_neutral() {
        let turn = emotion(PrimaryEmotion::Angry, 4, SeverityLevel::Casual);
        let (state, _) = next_state(ConversationState::SadSupport, 0, &turn, None);
        assert_eq!(state, ConversationState::Neutral);
    }

    #[test]
    fn venting_maps_each_emotion_to_its_light_state() {
        let cases = [
            (PrimaryEmotion::Angry, ConversationState::AngerDeescalate),
            (PrimaryEmotion::Anxious, ConversationState::AnxietyCalming),
            (PrimaryEmotion::Stressed, ConversationState::AnxietyCalming),
            (PrimaryEmotion::Sad, ConversationState::SadSupport),
            (PrimaryEmotion::Lonely, ConversationState::LonelyCompanionship),
            (PrimaryEmotion::Neutral, ConversationState::Neutral),
        ];
        for (primary, expected) in cases {
            let turn = emotion(primary, 3, SeverityLevel::Venting);
            let (state, _) = next_state(ConversationState::HopeGuidance, 0, &turn, None);
            assert_eq!(state, expected, "emotion {:?}", primary);
        }
    }

    #[test]
    fn support_with_unmapped_emotion_keeps_previous_state() {
        let turn = emotion(PrimaryEmotion::Neutral, 3, SeverityLevel::Support);
        let (state, _) = next_state(ConversationState::LonelyCompanionship, 0, &turn, None);
        assert_eq!(state, ConversationState::LonelyCompanionship);
    }

    #[test]
    fn high_risk_with_unmapped_emotion_never_yields_neutral() {
        let turn = emotion(PrimaryEmotion::Neutral, 3, SeverityLevel::HighRisk);
        let (from_neutral, _) = next_state(ConversationState::Neutral, 0, &turn, None);
        assert_eq!(from_neutral, ConversationState::SadSupport);

        let (from_support, _) = next_state(ConversationState::AnxietyCalming, 0, &turn, None);
        assert_eq!(from_support, ConversationState::AnxietyCalming);
    }

    #[test]
    fn hopeful_turn_overrides_severity_branch() {
        let turn = emotion(PrimaryEmotion::Grateful, 4, SeverityLevel::Support);
        let (state, _) = next_state(ConversationState::SadSupport, 0, &turn, None);
        assert_eq!(state, ConversationState::HopeGuidance);
    }

    #[test]
    fn long_term_positive_lean_steers_to_hope_guidance() {
        let mut profile = UserEmotionProfile {
            user_id: "u1".to_string(),
            sadness: 0.1,
            anxiety: 0.0,
            anger: 0.0,
            loneliness: 0.0,
            hope: 0.8,
            gratitude: 0.0,
            last_updated_at: Utc::now(),
        };
        let turn = emotion(PrimaryEmotion::Neutral, 3, SeverityLevel::Casual);
        let (state, _) = next_state(ConversationState::Neutral, 0, &turn, Some(&profile));
        assert_eq!(state, ConversationState::HopeGuidance);

        // A negative-dominant profile does not trigger the override.
        profile.hope = 0.0;
        profile.sadness = 0.9;
        let (state, _) = next_state(ConversationState::Neutral, 0, &turn, Some(&profile));
        assert_eq!(state, ConversationState::Neutral);
    }

    #[test]
    fn hope_override_never_beats_forced_neutral() {
        let calm_hope = emotion(PrimaryEmotion::Hopeful, 1, SeverityLevel::Casual);
        let (state, streak) = next_state(ConversationState::HopeGuidance, 2, &calm_hope, None);
        assert_eq!(state, ConversationState::Neutral);
        assert_eq!(streak, 3);
    }

    #[test]
    fn persisted_update_creates_record_lazily_and_tracks_streak() {
        let (_dir, db) = temp_db();
        let machine = ConversationStateMachine::new(&db);
        assert!(db.get_tone_record("c1").expect("load").is_none());

        // Scenario: three consecutive anxious SUPPORT turns at intensity 4.
        for _ in 0..3 {
            machine
                .update(
                    "c1",
                    &emotion(PrimaryEmotion::Anxious, 4, SeverityLevel::Support),
                    None,
                )
                .expect("update");
        }
        let record = db.get_tone_record("c1").expect("load").expect("exists");
        assert_eq!(record.current_state, ConversationState::AnxietyCalming);
        assert_eq!(record.last_emotion, PrimaryEmotion::Anxious);
        assert_eq!(record.low_intensity_streak, 0);
    }
}
