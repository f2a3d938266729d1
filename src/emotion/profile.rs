//! Long-term per-user emotional profile, recomputed opportunistically from
//! the recent emotion-log window.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::database::EmotionDatabase;
use crate::emotion::aggregate::ema;
use crate::emotion::PrimaryEmotion;

/// Six persisted EMA scores in [0,1]. STRESSED and NEUTRAL are observed in
/// the window shares but not persisted as their own columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEmotionProfile {
    pub user_id: String,
    pub sadness: f64,
    pub anxiety: f64,
    pub anger: f64,
    pub loneliness: f64,
    pub hope: f64,
    pub gratitude: f64,
    pub last_updated_at: DateTime<Utc>,
}

impl UserEmotionProfile {
    fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            sadness: 0.0,
            anxiety: 0.0,
            anger: 0.0,
            loneliness: 0.0,
            hope: 0.0,
            gratitude: 0.0,
            last_updated_at: Utc::now(),
        }
    }

    /// The strongest long-term tendency, if any score is non-zero.
    pub fn dominant_tendency(&self) -> Option<PrimaryEmotion> {
        let scored = [
            (PrimaryEmotion::Sad, self.sadness),
            (PrimaryEmotion::Anxious, self.anxiety),
            (PrimaryEmotion::Angry, self.anger),
            (PrimaryEmotion::Lonely, self.loneliness),
            (PrimaryEmotion::Hopeful, self.hope),
            (PrimaryEmotion::Grateful, self.gratitude),
        ];
        let mut best: Option<(PrimaryEmotion, f64)> = None;
        for (emotion, score) in scored {
            if score > 0.0 && best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((emotion, score));
            }
        }
        best.map(|(emotion, _)| emotion)
    }

    /// True when the long-term record leans hopeful/grateful overall.
    pub fn leans_positive(&self) -> bool {
        matches!(
            self.dominant_tendency(),
            Some(PrimaryEmotion::Hopeful) | Some(PrimaryEmotion::Grateful)
        )
    }
}

/// Weighted shares across all eight emotion buckets in one window pass.
#[derive(Debug, Default, Clone, Copy)]
struct WindowShares {
    sadness: f64,
    anxiety: f64,
    anger: f64,
    loneliness: f64,
    hope: f64,
    gratitude: f64,
    stress: f64,
    neutral: f64,
    total_weight: f64,
}

impl WindowShares {
    fn add(&mut self, emotion: PrimaryEmotion, intensity: u8) {
        let weight = f64::from(intensity) / 5.0;
        self.total_weight += weight;
        match emotion {
            PrimaryEmotion::Sad => self.sadness += weight,
            PrimaryEmotion::Anxious => self.anxiety += weight,
            PrimaryEmotion::Angry => self.anger += weight,
            PrimaryEmotion::Lonely => self.loneliness += weight,
            PrimaryEmotion::Hopeful => self.hope += weight,
            PrimaryEmotion::Grateful => self.gratitude += weight,
            PrimaryEmotion::Stressed => self.stress += weight,
            PrimaryEmotion::Neutral => self.neutral += weight,
        }
    }

    fn normalized(mut self) -> Self {
        if self.total_weight > 0.0 {
            self.sadness /= self.total_weight;
            self.anxiety /= self.total_weight;
            self.anger /= self.total_weight;
            self.loneliness /= self.total_weight;
            self.hope /= self.total_weight;
            self.gratitude /= self.total_weight;
            self.stress /= self.total_weight;
            self.neutral /= self.total_weight;
        }
        self
    }
}

pub struct UserProfileAggregator<'a> {
    db: &'a EmotionDatabase,
    window_days: i64,
    window_messages: usize,
}

impl<'a> UserProfileAggregator<'a> {
    pub fn new(db: &'a EmotionDatabase, config: &EngineConfig) -> Self {
        Self {
            db,
            window_days: config.trigger_window_days,
            window_messages: config.trigger_window_messages,
        }
    }

    /// Recompute the user's long-term profile from the recent window and
    /// blend it into the stored record with the shared EMA rule. Silently
    /// no-ops when the window is empty; best-effort by contract.
    pub fn update(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(());
        }

        let since = Utc::now() - ChronoDuration::days(self.window_days);
        let window = self
            .db
            .recent_emotional_messages(user_id, since, self.window_messages)?;
        if window.is_empty() {
            return Ok(());
        }

        let mut shares = WindowShares::default();
        for entry in &window {
            shares.add(entry.emotion, entry.intensity);
        }
        let shares = shares.normalized();

        let mut profile = self
            .db
            .get_user_profile(user_id)?
            .unwrap_or_else(|| UserEmotionProfile::empty(user_id));

        profile.sadness = ema(profile.sadness, shares.sadness);
        profile.anxiety = ema(profile.anxiety, shares.anxiety);
        profile.anger = ema(profile.anger, shares.anger);
        profile.loneliness = ema(profile.loneliness, shares.loneliness);
        profile.hope = ema(profile.hope, shares.hope);
        profile.gratitude = ema(profile.gratitude, shares.gratitude);
        profile.last_updated_at = Utc::now();

        self.db.save_user_profile(&profile)?;
        Ok(())
    }
}
