//! rafiq — emotional-state orchestration core for a conversational companion.
//!
//! Given a user message and recent history, the engine infers an emotional
//! signal, maintains short- and long-term emotional state, mines recurring
//! sensitive topics, drives a per-conversation tone state machine, assembles
//! the downstream generator's instruction block, and post-processes the raw
//! reply for tone and safety. HTTP routing, auth, billing and UI all live
//! outside this crate; the generator itself is an opaque collaborator behind
//! the [`generator::TextGenerator`] trait.

pub mod config;
pub mod database;
pub mod emotion;
pub mod engine;
pub mod generator;
pub mod llm_client;
pub mod persona;
pub mod prompt;
pub mod response;

pub use config::{EngineConfig, EngineTier, Language};
pub use database::{EmotionDatabase, EmotionLogEntry};
pub use emotion::aggregate::ConversationEmotionState;
pub use emotion::classifier::EmotionClassifier;
pub use emotion::profile::UserEmotionProfile;
pub use emotion::state_machine::{ConversationState, ConversationToneRecord};
pub use emotion::triggers::Trigger;
pub use emotion::{CultureTag, Emotion, PrimaryEmotion, SeverityLevel};
pub use engine::{CompanionEngine, EngineRequest, EngineResponse};
pub use generator::TextGenerator;
pub use llm_client::{ChatMessage, LlmClient};
pub use persona::{PersonaDefinition, PersonaRegistry, PersonaStyle};
