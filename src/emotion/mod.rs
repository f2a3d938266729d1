//! Core emotion types shared by the classifier, aggregators, state machine
//! and prompt/response layers.

use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod classifier;
pub mod profile;
pub mod state_machine;
pub mod triggers;

/// Maximum length of the free-text notes carried on an [`Emotion`].
pub const MAX_NOTES_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryEmotion {
    Neutral,
    Sad,
    Anxious,
    Angry,
    Lonely,
    Stressed,
    Hopeful,
    Grateful,
}

impl PrimaryEmotion {
    pub fn as_db_str(self) -> &'static str {
        match self {
            PrimaryEmotion::Neutral => "neutral",
            PrimaryEmotion::Sad => "sad",
            PrimaryEmotion::Anxious => "anxious",
            PrimaryEmotion::Angry => "angry",
            PrimaryEmotion::Lonely => "lonely",
            PrimaryEmotion::Stressed => "stressed",
            PrimaryEmotion::Hopeful => "hopeful",
            PrimaryEmotion::Grateful => "grateful",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sad" | "sadness" => PrimaryEmotion::Sad,
            "anxious" | "anxiety" => PrimaryEmotion::Anxious,
            "angry" | "anger" => PrimaryEmotion::Angry,
            "lonely" | "loneliness" => PrimaryEmotion::Lonely,
            "stressed" | "stress" => PrimaryEmotion::Stressed,
            "hopeful" | "hope" => PrimaryEmotion::Hopeful,
            "grateful" | "gratitude" => PrimaryEmotion::Grateful,
            _ => PrimaryEmotion::Neutral,
        }
    }

    /// The four categories the conversation aggregate tracks. HOPEFUL and
    /// GRATEFUL are tracked only in the long-term user profile and never
    /// become a conversation's dominant label.
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            PrimaryEmotion::Sad
                | PrimaryEmotion::Anxious
                | PrimaryEmotion::Angry
                | PrimaryEmotion::Lonely
        )
    }

    pub fn is_negative(self) -> bool {
        matches!(
            self,
            PrimaryEmotion::Sad
                | PrimaryEmotion::Anxious
                | PrimaryEmotion::Angry
                | PrimaryEmotion::Lonely
                | PrimaryEmotion::Stressed
        )
    }

    pub fn is_positive(self) -> bool {
        matches!(self, PrimaryEmotion::Hopeful | PrimaryEmotion::Grateful)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLevel {
    Casual,
    Venting,
    Support,
    HighRisk,
}

impl SeverityLevel {
    pub fn as_db_str(self) -> &'static str {
        match self {
            SeverityLevel::Casual => "casual",
            SeverityLevel::Venting => "venting",
            SeverityLevel::Support => "support",
            SeverityLevel::HighRisk => "high_risk",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "venting" => SeverityLevel::Venting,
            "support" => SeverityLevel::Support,
            "high_risk" | "highrisk" => SeverityLevel::HighRisk,
            _ => SeverityLevel::Casual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CultureTag {
    Arabic,
    English,
    Mixed,
}

/// Structured emotional signal inferred from one user message.
///
/// Produced per message by the classifier; `intensity` and `confidence` are
/// always clamped to range before the record is handed to anyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emotion {
    pub primary: PrimaryEmotion,
    pub intensity: u8,
    pub confidence: f32,
    pub culture: CultureTag,
    pub severity: SeverityLevel,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Emotion {
    pub fn new(
        primary: PrimaryEmotion,
        intensity: u8,
        confidence: f32,
        culture: CultureTag,
        severity: SeverityLevel,
        notes: Option<String>,
    ) -> Self {
        Self {
            primary,
            intensity: clamp_intensity(intensity as i64),
            confidence: clamp_confidence(confidence),
            culture,
            severity,
            notes: notes.map(|n| truncate_chars(&n, MAX_NOTES_CHARS)),
        }
    }

    /// The deterministic record every classification failure resolves to.
    pub fn neutral_fallback(culture: CultureTag) -> Self {
        Self {
            primary: PrimaryEmotion::Neutral,
            intensity: 2,
            confidence: 0.35,
            culture,
            severity: SeverityLevel::Casual,
            notes: Some("fallback".to_string()),
        }
    }

    /// Re-applies range clamping after any field-level mutation.
    pub fn clamped(mut self) -> Self {
        self.intensity = clamp_intensity(self.intensity as i64);
        self.confidence = clamp_confidence(self.confidence);
        if let Some(notes) = self.notes.take() {
            self.notes = Some(truncate_chars(&notes, MAX_NOTES_CHARS));
        }
        self
    }
}

pub fn clamp_intensity(raw: i64) -> u8 {
    raw.clamp(1, 5) as u8
}

pub fn clamp_confidence(raw: f32) -> f32 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intensity_and_confidence_clamp_to_range() {
        let emotion = Emotion::new(
            PrimaryEmotion::Sad,
            9,
            1.7,
            CultureTag::English,
            SeverityLevel::Venting,
            None,
        );
        assert_eq!(emotion.intensity, 5);
        assert_eq!(emotion.confidence, 1.0);

        let emotion = Emotion::new(
            PrimaryEmotion::Sad,
            0,
            -0.5,
            CultureTag::English,
            SeverityLevel::Venting,
            None,
        );
        assert_eq!(emotion.intensity, 1);
        assert_eq!(emotion.confidence, 0.0);
    }

    #[test]
    fn non_finite_confidence_collapses_to_zero() {
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(f32::INFINITY), 0.0);
    }

    #[test]
    fn notes_truncate_to_limit() {
        let long = "x".repeat(1000);
        let emotion = Emotion::new(
            PrimaryEmotion::Neutral,
            2,
            0.5,
            CultureTag::English,
            SeverityLevel::Casual,
            Some(long),
        );
        assert_eq!(emotion.notes.unwrap().chars().count(), MAX_NOTES_CHARS);
    }

    #[test]
    fn fallback_record_matches_contract() {
        let fallback = Emotion::neutral_fallback(CultureTag::Mixed);
        assert_eq!(fallback.primary, PrimaryEmotion::Neutral);
        assert_eq!(fallback.intensity, 2);
        assert!(fallback.confidence <= 0.4);
        assert_eq!(fallback.notes.as_deref(), Some("fallback"));
    }

    #[test]
    fn tracked_set_excludes_positive_emotions() {
        assert!(PrimaryEmotion::Sad.is_tracked());
        assert!(PrimaryEmotion::Lonely.is_tracked());
        assert!(!PrimaryEmotion::Hopeful.is_tracked());
        assert!(!PrimaryEmotion::Grateful.is_tracked());
        assert!(!PrimaryEmotion::Stressed.is_tracked());
    }
}
