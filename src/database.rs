use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::emotion::aggregate::ConversationEmotionState;
use crate::emotion::profile::UserEmotionProfile;
use crate::emotion::state_machine::{ConversationState, ConversationToneRecord};
use crate::emotion::PrimaryEmotion;

/// One row of the append-only per-message emotion log. This is the sink the
/// pipeline writes after every reply and the window the trigger miner and
/// profile aggregator read back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionLogEntry {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub emotion: PrimaryEmotion,
    pub intensity: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl EmotionLogEntry {
    pub fn new(
        user_id: &str,
        conversation_id: &str,
        emotion: PrimaryEmotion,
        intensity: u8,
        message: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            emotion,
            intensity,
            message: message.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// SQLite-backed store for the four keyed emotional-state records plus the
/// emotion log. Read-modify-write cycles are deliberately untransacted:
/// concurrent messages on the same conversation race and the last writer
/// wins, matching the source product's accepted semantics.
pub struct EmotionDatabase {
    conn: Mutex<Connection>,
}

impl EmotionDatabase {
    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create the database schema
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS conversation_emotion_state (
                conversation_id TEXT PRIMARY KEY,
                dominant TEXT NOT NULL,
                sad REAL NOT NULL,
                anxious REAL NOT NULL,
                angry REAL NOT NULL,
                lonely REAL NOT NULL,
                avg_intensity REAL NOT NULL,
                last_updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS user_emotion_profile (
                user_id TEXT PRIMARY KEY,
                sadness REAL NOT NULL,
                anxiety REAL NOT NULL,
                anger REAL NOT NULL,
                loneliness REAL NOT NULL,
                hope REAL NOT NULL,
                gratitude REAL NOT NULL,
                last_updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS conversation_tone (
                conversation_id TEXT PRIMARY KEY,
                current_state TEXT NOT NULL,
                last_emotion TEXT NOT NULL,
                low_intensity_streak INTEGER NOT NULL DEFAULT 0,
                last_updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS emotion_log (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                emotion TEXT NOT NULL,
                intensity INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_emotion_log_user_time
             ON emotion_log (user_id, created_at DESC)",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Conversation aggregate state
    // ========================================================================

    pub fn get_conversation_state(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationEmotionState>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT conversation_id, dominant, sad, anxious, angry, lonely,
                    avg_intensity, last_updated_at
             FROM conversation_emotion_state
             WHERE conversation_id = ?1",
            [conversation_id],
            |row| {
                let dominant_raw: String = row.get(1)?;
                let updated_raw: String = row.get(7)?;
                Ok(ConversationEmotionState {
                    conversation_id: row.get(0)?,
                    dominant: PrimaryEmotion::from_db(&dominant_raw),
                    sad: row.get(2)?,
                    anxious: row.get(3)?,
                    angry: row.get(4)?,
                    lonely: row.get(5)?,
                    avg_intensity: row.get(6)?,
                    last_updated_at: parse_timestamp(&updated_raw, 7)?,
                })
            },
        );

        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to load conversation emotion state"),
        }
    }

    pub fn save_conversation_state(&self, state: &ConversationEmotionState) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversation_emotion_state
             (conversation_id, dominant, sad, anxious, angry, lonely, avg_intensity, last_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                state.conversation_id,
                state.dominant.as_db_str(),
                state.sad,
                state.anxious,
                state.angry,
                state.lonely,
                state.avg_intensity,
                state.last_updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Long-term user profile
    // ========================================================================

    pub fn get_user_profile(&self, user_id: &str) -> Result<Option<UserEmotionProfile>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT user_id, sadness, anxiety, anger, loneliness, hope, gratitude,
                    last_updated_at
             FROM user_emotion_profile
             WHERE user_id = ?1",
            [user_id],
            |row| {
                let updated_raw: String = row.get(7)?;
                Ok(UserEmotionProfile {
                    user_id: row.get(0)?,
                    sadness: row.get(1)?,
                    anxiety: row.get(2)?,
                    anger: row.get(3)?,
                    loneliness: row.get(4)?,
                    hope: row.get(5)?,
                    gratitude: row.get(6)?,
                    last_updated_at: parse_timestamp(&updated_raw, 7)?,
                })
            },
        );

        match result {
            Ok(profile) => Ok(Some(profile)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to load user emotion profile"),
        }
    }

    pub fn save_user_profile(&self, profile: &UserEmotionProfile) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_emotion_profile
             (user_id, sadness, anxiety, anger, loneliness, hope, gratitude, last_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.user_id,
                profile.sadness,
                profile.anxiety,
                profile.anger,
                profile.loneliness,
                profile.hope,
                profile.gratitude,
                profile.last_updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Conversation tone state machine
    // ========================================================================

    pub fn get_tone_record(&self, conversation_id: &str) -> Result<Option<ConversationToneRecord>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT conversation_id, current_state, last_emotion, low_intensity_streak,
                    last_updated_at
             FROM conversation_tone
             WHERE conversation_id = ?1",
            [conversation_id],
            |row| {
                let state_raw: String = row.get(1)?;
                let emotion_raw: String = row.get(2)?;
                let streak: i64 = row.get(3)?;
                let updated_raw: String = row.get(4)?;
                Ok(ConversationToneRecord {
                    conversation_id: row.get(0)?,
                    current_state: ConversationState::from_db(&state_raw),
                    last_emotion: PrimaryEmotion::from_db(&emotion_raw),
                    low_intensity_streak: streak.max(0) as u32,
                    last_updated_at: parse_timestamp(&updated_raw, 4)?,
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to load conversation tone record"),
        }
    }

    pub fn save_tone_record(&self, record: &ConversationToneRecord) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversation_tone
             (conversation_id, current_state, last_emotion, low_intensity_streak, last_updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.conversation_id,
                record.current_state.as_db_str(),
                record.last_emotion.as_db_str(),
                record.low_intensity_streak,
                record.last_updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // Emotion log (append-only sink + windowed reads)
    // ========================================================================

    pub fn append_emotion_log(&self, entry: &EmotionLogEntry) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO emotion_log
             (id, user_id, conversation_id, emotion, intensity, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.user_id,
                entry.conversation_id,
                entry.emotion.as_db_str(),
                entry.intensity,
                entry.message,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Recent emotion-tagged messages for a user, newest first, bounded by a
    /// time floor and a row cap. This is the one windowed read contract the
    /// trigger miner and profile aggregator share.
    pub fn recent_emotional_messages(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EmotionLogEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, conversation_id, emotion, intensity, message, created_at
             FROM emotion_log
             WHERE user_id = ?1 AND created_at >= ?2
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![user_id, since.to_rfc3339(), limit as i64],
            |row| {
                let emotion_raw: String = row.get(3)?;
                let intensity: i64 = row.get(4)?;
                let created_raw: String = row.get(6)?;
                Ok(EmotionLogEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    conversation_id: row.get(2)?,
                    emotion: PrimaryEmotion::from_db(&emotion_raw),
                    intensity: intensity.clamp(1, 5) as u8,
                    message: row.get(5)?,
                    created_at: parse_timestamp(&created_raw, 6)?,
                })
            },
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
