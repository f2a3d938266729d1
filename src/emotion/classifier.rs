//! Two-tier emotion classifier.
//!
//! A heuristic keyword tier handles short or first-contact messages locally
//! (latency and cost control); everything else goes to the model-assisted
//! tier, which demands strict JSON and is parsed defensively. The classifier
//! never fails: every internal error resolves to the documented neutral
//! fallback value.

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::config::{EngineConfig, Language};
use crate::emotion::{
    clamp_confidence, clamp_intensity, truncate_chars, CultureTag, Emotion, PrimaryEmotion,
    SeverityLevel, MAX_NOTES_CHARS,
};
use crate::generator::TextGenerator;
use crate::llm_client::{parse_json_response, ChatMessage};

/// Fixed confidence assigned to heuristic-tier classifications.
const HEURISTIC_CONFIDENCE: f32 = 0.6;

/// Ordered keyword rule table: first match wins, so the ordering is part of
/// the contract (sadness outranks loneliness — "alone and sad" is SAD).
/// The rules are data so they can be tested independently of control flow.
const KEYWORD_RULES: &[(PrimaryEmotion, &[&str])] = &[
    (
        PrimaryEmotion::Sad,
        &[
            "sad", "depress", "unhappy", "miserable", "crying", "cried", "heartbroken",
            "hopeless", "grief", "حزين", "حزينة", "حزن", "مكتئب", "زعلان",
        ],
    ),
    (
        PrimaryEmotion::Anxious,
        &[
            "anxious", "anxiety", "worried", "worry", "nervous", "scared", "afraid",
            "panic", "قلق", "قلقان", "خايف", "خائف", "توتر",
        ],
    ),
    (
        PrimaryEmotion::Angry,
        &[
            "angry", "furious", "rage", "hate", "annoyed", "frustrated", "غاضب",
            "عصبي", "محبط", "مستفز",
        ],
    ),
    (
        PrimaryEmotion::Stressed,
        &[
            "stress", "stressed", "overwhelmed", "exhausted", "burnout", "pressure",
            "ضغط", "مرهق", "تعبان",
        ],
    ),
    (
        PrimaryEmotion::Lonely,
        &["lonely", "alone", "isolated", "nobody", "وحيد", "وحدي", "وحده"],
    ),
    (
        PrimaryEmotion::Hopeful,
        &[
            "hope", "hopeful", "better", "grateful", "thankful", "thanks", "excited",
            "أمل", "متفائل", "شكرا", "ممتن",
        ],
    ),
];

/// Crisis phrases that force HIGH_RISK regardless of tier.
const CRISIS_KEYWORDS: &[&str] = &[
    "suicide",
    "kill myself",
    "end my life",
    "want to die",
    "hurt myself",
    "self harm",
    "انتحار",
    "اقتل نفسي",
    "أقتل نفسي",
    "اموت",
    "أموت",
];

/// Raw model payload: every field optional so a partially-valid response can
/// still be salvaged field by field.
#[derive(Debug, Deserialize)]
struct RawEmotionPayload {
    #[serde(default, alias = "primaryEmotion")]
    primary_emotion: Option<String>,
    #[serde(default)]
    intensity: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "cultureTag")]
    culture_tag: Option<String>,
    #[serde(default, alias = "severityLevel")]
    severity_level: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

pub struct EmotionClassifier<'a> {
    generator: &'a dyn TextGenerator,
    heuristic_max_chars: usize,
    history_turns: usize,
    history_turn_max_chars: usize,
    classify_timeout: Duration,
}

impl<'a> EmotionClassifier<'a> {
    pub fn new(generator: &'a dyn TextGenerator, config: &EngineConfig) -> Self {
        Self {
            generator,
            heuristic_max_chars: config.heuristic_max_chars,
            history_turns: config.history_turns,
            history_turn_max_chars: config.history_turn_max_chars,
            classify_timeout: Duration::from_secs(config.classify_timeout_secs),
        }
    }

    /// Classify one message in context. Never returns an error to the
    /// caller: timeouts, transport failures and malformed structured output
    /// all degrade to [`Emotion::neutral_fallback`].
    pub async fn classify(
        &self,
        message: &str,
        recent_history: &[ChatMessage],
        language: Language,
    ) -> Emotion {
        let culture = detect_culture(message, language);

        if message.chars().count() <= self.heuristic_max_chars || recent_history.is_empty() {
            return heuristic_classify(message, culture);
        }

        match self.model_classify(message, recent_history, culture).await {
            Ok(emotion) => emotion,
            Err(e) => {
                tracing::warn!("Emotion classification degraded to fallback: {}", e);
                Emotion::neutral_fallback(culture)
            }
        }
    }

    async fn model_classify(
        &self,
        message: &str,
        recent_history: &[ChatMessage],
        culture: CultureTag,
    ) -> Result<Emotion> {
        let mut messages = vec![ChatMessage::system(CLASSIFIER_INSTRUCTION)];

        let start = recent_history.len().saturating_sub(self.history_turns);
        for turn in &recent_history[start..] {
            messages.push(ChatMessage {
                role: turn.role.clone(),
                content: truncate_chars(&turn.content, self.history_turn_max_chars),
            });
        }
        messages.push(ChatMessage::user(format!(
            "Classify the emotional signal of this message:\n{}",
            message
        )));

        let raw = self
            .generator
            .generate_raw(&messages, self.classify_timeout)
            .await?;
        let payload: RawEmotionPayload = parse_json_response(&raw)?;
        Ok(emotion_from_payload(payload, culture, message))
    }
}

const CLASSIFIER_INSTRUCTION: &str = "You are an emotion classifier for a supportive companion. \
Respond with ONLY a JSON object, no prose, with exactly these fields:\n\
{\n  \"primary_emotion\": one of NEUTRAL|SAD|ANXIOUS|ANGRY|LONELY|STRESSED|HOPEFUL|GRATEFUL,\n  \
\"intensity\": integer 1-5,\n  \
\"confidence\": float 0-1,\n  \
\"culture_tag\": one of ARABIC|ENGLISH|MIXED,\n  \
\"severity_level\": one of CASUAL|VENTING|SUPPORT|HIGH_RISK,\n  \
\"notes\": short free text (optional)\n}";

/// Substitute-or-clamp every field of a model payload. A missing or garbage
/// field degrades alone instead of poisoning the whole record.
fn emotion_from_payload(payload: RawEmotionPayload, culture: CultureTag, message: &str) -> Emotion {
    let primary = payload
        .primary_emotion
        .as_deref()
        .map(PrimaryEmotion::from_db)
        .unwrap_or(PrimaryEmotion::Neutral);

    let intensity = payload
        .intensity
        .filter(|i| i.is_finite())
        .map(|i| clamp_intensity(i.round() as i64))
        .unwrap_or(2);

    let confidence = payload
        .confidence
        .map(|c| clamp_confidence(c as f32))
        .unwrap_or(0.5);

    let culture = payload
        .culture_tag
        .as_deref()
        .and_then(parse_culture_tag)
        .unwrap_or(culture);

    let mut severity = payload
        .severity_level
        .as_deref()
        .map(SeverityLevel::from_db)
        .unwrap_or(SeverityLevel::Casual);
    if contains_crisis_keyword(message) {
        severity = SeverityLevel::HighRisk;
    }

    Emotion::new(
        primary,
        intensity,
        confidence,
        culture,
        severity,
        payload.notes.map(|n| truncate_chars(&n, MAX_NOTES_CHARS)),
    )
}

fn parse_culture_tag(raw: &str) -> Option<CultureTag> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "arabic" | "ar" => Some(CultureTag::Arabic),
        "english" | "en" => Some(CultureTag::English),
        "mixed" => Some(CultureTag::Mixed),
        _ => None,
    }
}

/// Purely local keyword classification with length-derived intensity.
pub fn heuristic_classify(message: &str, culture: CultureTag) -> Emotion {
    let lowered = message.to_lowercase();

    let primary = KEYWORD_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(emotion, _)| *emotion)
        .unwrap_or(PrimaryEmotion::Neutral);

    let severity = if contains_crisis_keyword(&lowered) {
        SeverityLevel::HighRisk
    } else {
        SeverityLevel::Casual
    };

    let intensity = length_derived_intensity(message);

    Emotion::new(
        primary,
        intensity,
        HEURISTIC_CONFIDENCE,
        culture,
        severity,
        None,
    )
}

/// `round(1 + min(len/80, 4))`, clamped 1-5.
pub fn length_derived_intensity(message: &str) -> u8 {
    let len = message.chars().count() as f64;
    clamp_intensity((1.0 + (len / 80.0).min(4.0)).round() as i64)
}

fn contains_crisis_keyword(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CRISIS_KEYWORDS.iter().any(|k| lowered.contains(k))
}

fn detect_culture(message: &str, language: Language) -> CultureTag {
    let has_arabic = message
        .chars()
        .any(|c| ('\u{0600}'..='\u{06FF}').contains(&c));
    let has_latin = message.chars().any(|c| c.is_ascii_alphabetic());
    match (has_arabic, has_latin) {
        (true, true) => CultureTag::Mixed,
        (true, false) => CultureTag::Arabic,
        (false, true) => CultureTag::English,
        (false, false) => match language {
            Language::Arabic => CultureTag::Arabic,
            Language::English => CultureTag::English,
        },
    }
}
