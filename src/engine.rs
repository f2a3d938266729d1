//! The caller-facing orchestration: one `run` call per incoming message,
//! with every side effect (persistence, telemetry) hidden behind it.
//!
//! Per-request flow: classify, fold into the conversation aggregate, fan out
//! the three best-effort reads, advance the tone state machine, assemble the
//! prompt, call the generator, post-process the reply. The emotion-log
//! append and profile refresh run fire-and-forget after the reply is built,
//! trading strict consistency for response latency.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, EngineTier, Language};
use crate::database::{EmotionDatabase, EmotionLogEntry};
use crate::emotion::aggregate::{ConversationAggregator, ConversationEmotionState};
use crate::emotion::classifier::EmotionClassifier;
use crate::emotion::profile::{UserEmotionProfile, UserProfileAggregator};
use crate::emotion::state_machine::{ConversationState, ConversationStateMachine};
use crate::emotion::triggers::{Trigger, TriggerMiner};
use crate::emotion::{Emotion, SeverityLevel};
use crate::generator::TextGenerator;
use crate::llm_client::ChatMessage;
use crate::persona::PersonaRegistry;
use crate::prompt::{assemble_prompt, fallback_prompt, PromptContext};
use crate::response;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    pub user_message: String,
    #[serde(default)]
    pub recent_messages: Vec<ChatMessage>,
    pub persona_id: String,
    pub language: Language,
    #[serde(default)]
    pub dialect: Option<String>,
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_premium_user: bool,
    pub engine_tier: EngineTier,
    // Optional enrichment supplied by the caller's memory layer.
    #[serde(default)]
    pub identity_facts: Vec<String>,
    #[serde(default)]
    pub loop_tag: Option<String>,
    #[serde(default)]
    pub anchors: Vec<String>,
    #[serde(default)]
    pub recent_events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub emotion: Emotion,
    pub severity: SeverityLevel,
    pub conversation_state: ConversationState,
    pub system_prompt: String,
    pub final_reply: String,
}

enum BackgroundJob {
    LogEmotion(EmotionLogEntry),
    RefreshProfile { user_id: String },
}

pub struct CompanionEngine {
    config: EngineConfig,
    db: Arc<EmotionDatabase>,
    generator: Arc<dyn TextGenerator>,
    personas: Arc<PersonaRegistry>,
    background_tx: flume::Sender<BackgroundJob>,
}

impl CompanionEngine {
    /// Build the engine and spawn its background worker. Must be called
    /// from within a tokio runtime.
    pub fn new(config: EngineConfig, generator: Arc<dyn TextGenerator>) -> Result<Self> {
        let db = Arc::new(
            EmotionDatabase::new(&config.database_path).context("Failed to open emotion database")?,
        );

        let personas = match &config.persona_overlay_path {
            Some(path) => match PersonaRegistry::with_overlay(path) {
                Ok(registry) => registry,
                Err(e) => {
                    tracing::warn!("Persona overlay rejected, using built-ins: {}", e);
                    PersonaRegistry::default()
                }
            },
            None => PersonaRegistry::default(),
        };

        let (background_tx, background_rx) = flume::unbounded();
        spawn_background_worker(background_rx, db.clone(), config.clone());

        Ok(Self {
            config,
            db,
            generator,
            personas: Arc::new(personas),
            background_tx,
        })
    }

    /// Handle one incoming message end to end.
    ///
    /// Only a totally unrecoverable failure propagates; every subsystem
    /// failure short of that is absorbed at its own boundary and degrades
    /// the response instead of failing it.
    pub async fn run(&self, request: EngineRequest) -> Result<EngineResponse> {
        let emotion = EmotionClassifier::new(self.generator.as_ref(), &self.config)
            .classify(&request.user_message, &request.recent_messages, request.language)
            .await;

        // Sequential: the state machine depends on the just-computed emotion
        // and, historically, on the aggregator's write.
        let conversation = self.update_conversation_aggregate(&request, &emotion).await;
        let (profile, triggers) = self.fan_out_reads(&request).await;
        let tone = self
            .advance_state_machine(&request, &emotion, profile.clone())
            .await;

        let persona = self.personas.lookup_or_default(&request.persona_id);
        let reason_label = format!(
            "{} severity with {} emotion",
            emotion.severity.as_db_str(),
            emotion.primary.as_db_str()
        );

        let system_prompt = assemble_prompt(&PromptContext {
            persona,
            emotion: &emotion,
            conversation: conversation.as_ref(),
            tone,
            language: request.language,
            dialect: request.dialect.as_deref(),
            profile: profile.as_ref(),
            triggers: &triggers,
            identity_facts: &request.identity_facts,
            loop_tag: request.loop_tag.as_deref(),
            anchors: &request.anchors,
            recent_events: &request.recent_events,
            reason_label: Some(&reason_label),
            tier: request.engine_tier,
            premium: request.is_premium_user,
        });

        let raw_reply = self.call_generator(&request, &system_prompt).await;
        let final_reply = response::rewrite(
            &raw_reply,
            &emotion,
            tone,
            &triggers,
            request.language,
            &persona.style,
        );

        self.enqueue_background_updates(&request, &emotion);

        Ok(EngineResponse {
            severity: emotion.severity,
            emotion,
            conversation_state: tone,
            system_prompt,
            final_reply,
        })
    }

    /// A usable prompt even when nothing else is available.
    pub fn neutral_prompt(&self, persona_id: &str, language: Language) -> String {
        fallback_prompt(self.personas.lookup_or_default(persona_id), language)
    }

    async fn update_conversation_aggregate(
        &self,
        request: &EngineRequest,
        emotion: &Emotion,
    ) -> Option<ConversationEmotionState> {
        let db = self.db.clone();
        let conversation_id = request.conversation_id.clone();
        let emotion = emotion.clone();
        let result = tokio::task::spawn_blocking(move || {
            ConversationAggregator::new(&db).update(&conversation_id, &emotion)
        })
        .await;

        match result {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::warn!("Conversation aggregate update failed, proceeding without: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Conversation aggregate task panicked: {}", e);
                None
            }
        }
    }

    /// The three enrichment reads are independent and best-effort: a failure
    /// in one never cancels the others, it only shrinks the prompt.
    async fn fan_out_reads(
        &self,
        request: &EngineRequest,
    ) -> (Option<UserEmotionProfile>, Vec<Trigger>) {
        let profile_db = self.db.clone();
        let profile_user = request.user_id.clone();
        let profile_task =
            tokio::task::spawn_blocking(move || profile_db.get_user_profile(&profile_user));

        let trigger_db = self.db.clone();
        let trigger_user = request.user_id.clone();
        let trigger_config = self.config.clone();
        let trigger_task = tokio::task::spawn_blocking(move || {
            TriggerMiner::new(&trigger_db, &trigger_config).detect_triggers(&trigger_user)
        });

        let (profile_result, trigger_result) = tokio::join!(profile_task, trigger_task);

        let profile = match profile_result {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                tracing::warn!("Profile snapshot read failed: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Profile snapshot task panicked: {}", e);
                None
            }
        };

        let triggers = match trigger_result {
            Ok(Ok(triggers)) => triggers,
            Ok(Err(e)) => {
                tracing::warn!("Trigger detection failed: {}", e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Trigger detection task panicked: {}", e);
                Vec::new()
            }
        };

        (profile, triggers)
    }

    async fn advance_state_machine(
        &self,
        request: &EngineRequest,
        emotion: &Emotion,
        profile: Option<UserEmotionProfile>,
    ) -> ConversationState {
        let db = self.db.clone();
        let conversation_id = request.conversation_id.clone();
        let emotion = emotion.clone();
        let result = tokio::task::spawn_blocking(move || {
            ConversationStateMachine::new(&db).update(
                &conversation_id,
                &emotion,
                profile.as_ref(),
            )
        })
        .await;

        match result {
            Ok(Ok(record)) => record.current_state,
            Ok(Err(e)) => {
                tracing::warn!("Tone state update failed, holding neutral: {}", e);
                ConversationState::Neutral
            }
            Err(e) => {
                tracing::warn!("Tone state task panicked: {}", e);
                ConversationState::Neutral
            }
        }
    }

    async fn call_generator(&self, request: &EngineRequest, system_prompt: &str) -> String {
        let mut messages = request.recent_messages.clone();
        messages.push(ChatMessage::user(request.user_message.clone()));

        let timeout = Duration::from_secs(self.config.generate_timeout_secs);
        match self.generator.generate(system_prompt, &messages, timeout).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                tracing::warn!("Generator returned empty reply, using fallback text");
                fallback_reply(request.language)
            }
            Err(e) => {
                tracing::warn!("Generator call failed, using fallback text: {}", e);
                fallback_reply(request.language)
            }
        }
    }

    fn enqueue_background_updates(&self, request: &EngineRequest, emotion: &Emotion) {
        let entry = EmotionLogEntry::new(
            &request.user_id,
            &request.conversation_id,
            emotion.primary,
            emotion.intensity,
            &request.user_message,
        );
        if self.background_tx.send(BackgroundJob::LogEmotion(entry)).is_err() {
            tracing::warn!("Background worker gone; emotion log entry dropped");
        }
        let refresh = BackgroundJob::RefreshProfile {
            user_id: request.user_id.clone(),
        };
        if self.background_tx.send(refresh).is_err() {
            tracing::warn!("Background worker gone; profile refresh dropped");
        }
    }
}

fn fallback_reply(language: Language) -> String {
    match language {
        Language::English => {
            "I'm here with you. Tell me more about what's on your mind.".to_string()
        }
        Language::Arabic => "أنا هنا معك. احكِ لي أكثر عمّا يشغل بالك.".to_string(),
    }
}

fn spawn_background_worker(
    rx: flume::Receiver<BackgroundJob>,
    db: Arc<EmotionDatabase>,
    config: EngineConfig,
) {
    tokio::spawn(async move {
        while let Ok(job) = rx.recv_async().await {
            let db = db.clone();
            let config = config.clone();
            let result = tokio::task::spawn_blocking(move || match job {
                BackgroundJob::LogEmotion(entry) => db
                    .append_emotion_log(&entry)
                    .context("emotion log append failed"),
                BackgroundJob::RefreshProfile { user_id } => {
                    UserProfileAggregator::new(&db, &config)
                        .update(&user_id)
                        .context("profile refresh failed")
                }
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Background update failed: {}", e),
                Err(e) => tracing::warn!("Background update task panicked: {}", e),
            }
        }
        tracing::debug!("Background worker shutting down");
    });
}
