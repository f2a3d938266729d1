//! Deterministic assembly of the downstream generator's instruction block.
//!
//! Pure given its inputs: no randomness, no hidden state beyond the
//! process-wide persona style-text cache (immutable static data).

use serde::{Deserialize, Serialize};

use crate::config::{EngineTier, Language};
use crate::emotion::aggregate::ConversationEmotionState;
use crate::emotion::profile::UserEmotionProfile;
use crate::emotion::state_machine::ConversationState;
use crate::emotion::triggers::Trigger;
use crate::emotion::Emotion;
use crate::persona::{style_text, PersonaDefinition};

/// Coarse direction of the current turn, derived rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DominantTrend {
    Negative,
    Positive,
    Mixed,
}

impl DominantTrend {
    pub fn derive(emotion: &Emotion) -> Self {
        if emotion.primary.is_negative() && emotion.intensity >= 3 {
            DominantTrend::Negative
        } else if emotion.primary.is_positive() {
            DominantTrend::Positive
        } else {
            DominantTrend::Mixed
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            DominantTrend::Negative => "NEGATIVE",
            DominantTrend::Positive => "POSITIVE",
            DominantTrend::Mixed => "MIXED",
        }
    }
}

/// Everything the assembler needs for one turn. All enrichment fields are
/// optional; their absence only shrinks the prompt.
pub struct PromptContext<'a> {
    pub persona: &'a PersonaDefinition,
    pub emotion: &'a Emotion,
    pub conversation: Option<&'a ConversationEmotionState>,
    pub tone: ConversationState,
    pub language: Language,
    pub dialect: Option<&'a str>,
    pub profile: Option<&'a UserEmotionProfile>,
    pub triggers: &'a [Trigger],
    pub identity_facts: &'a [String],
    pub loop_tag: Option<&'a str>,
    pub anchors: &'a [String],
    pub recent_events: &'a [String],
    pub reason_label: Option<&'a str>,
    pub tier: EngineTier,
    pub premium: bool,
}

const HEADER_EN: &str = "You are a supportive conversational companion. Stay in persona, \
mirror the user's language, and respond to the emotional signal described below.";
const HEADER_AR: &str = "أنت رفيق محادثة داعم. حافظ على شخصيتك، جارِ لغة المستخدم، \
واستجب للإشارة العاطفية الموصوفة أدناه.";

const SAFETY_RULES_EN: &str = "Safety rules: never give medical, legal or financial directives; \
never diagnose; if the user mentions self-harm, gently encourage reaching out to someone they \
trust or a local crisis line; never shame the user for what they feel.";
const SAFETY_RULES_AR: &str = "قواعد الأمان: لا تقدّم توجيهات طبية أو قانونية أو مالية؛ لا تشخّص؛ \
إذا ذكر المستخدم إيذاء النفس فشجّعه بلطف على التواصل مع شخص يثق به أو خط مساعدة محلي؛ \
لا تجعل المستخدم يخجل من مشاعره.";

const LENGTH_GUIDANCE_EN: &str = "Keep replies to a few short sentences and vary your openings; \
do not repeat the same comfort phrase twice in a row.";
const LENGTH_GUIDANCE_AR: &str = "اجعل الردود قصيرة في جمل قليلة ونوّع افتتاحياتك؛ \
لا تكرر نفس عبارة المواساة مرتين متتاليتين.";

const PREMIUM_TOOLKIT_EN: &str = "Premium toolkit: you may offer one brief grounding or \
reframing exercise when it fits naturally, at most once in this reply.";
const PREMIUM_TOOLKIT_AR: &str = "عدة النسخة المميزة: يمكنك اقتراح تمرين قصير واحد للتهدئة أو \
إعادة الصياغة عندما يكون مناسباً، مرة واحدة كحد أقصى في هذا الرد.";

/// Render the full instruction block for one turn.
pub fn assemble_prompt(ctx: &PromptContext<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    // Header
    sections.push(
        match ctx.language {
            Language::English => HEADER_EN,
            Language::Arabic => HEADER_AR,
        }
        .to_string(),
    );

    // Dialect / cultural guidance
    sections.push(dialect_guidance(ctx.language, ctx.dialect));

    // Persona description + style attributes (memoized)
    sections.push(style_text(ctx.persona, ctx.language));

    // Current-emotion line
    sections.push(format!(
        "Current emotion: {} (intensity {}/5, severity {}).",
        ctx.emotion.primary.as_db_str(),
        ctx.emotion.intensity,
        ctx.emotion.severity.as_db_str(),
    ));

    // Conversation-state line
    sections.push(match ctx.conversation {
        Some(state) => format!(
            "Conversation tone state: {}. Dominant conversation emotion: {} (smoothed intensity {:.2}).",
            ctx.tone.as_db_str(),
            state.dominant.as_db_str(),
            state.avg_intensity,
        ),
        None => format!("Conversation tone state: {}.", ctx.tone.as_db_str()),
    });

    // Structured EMOTION_STATE block
    sections.push(emotion_state_block(ctx));

    // Optional enrichment blocks
    if let Some(profile) = ctx.profile {
        sections.push(long_term_block(profile));
    }
    if !ctx.triggers.is_empty() {
        sections.push(trigger_block(ctx.triggers));
    }
    if !ctx.identity_facts.is_empty() {
        sections.push(format!(
            "Known about the user:\n{}",
            ctx.identity_facts
                .iter()
                .map(|fact| format!("- {}", fact))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }
    if let Some(loop_tag) = ctx.loop_tag {
        sections.push(format!(
            "Anti-repetition: the conversation is circling the loop \"{}\". \
             Acknowledge it once, then gently move forward instead of re-opening it.",
            loop_tag
        ));
    }

    // Safety rules (fixed per language)
    sections.push(
        match ctx.language {
            Language::English => SAFETY_RULES_EN,
            Language::Arabic => SAFETY_RULES_AR,
        }
        .to_string(),
    );

    // Length/variation guidance
    sections.push(
        match ctx.language {
            Language::English => LENGTH_GUIDANCE_EN,
            Language::Arabic => LENGTH_GUIDANCE_AR,
        }
        .to_string(),
    );

    // One-shot premium toolkit, deepest tier only
    if ctx.tier == EngineTier::Deep && ctx.premium {
        sections.push(
            match ctx.language {
                Language::English => PREMIUM_TOOLKIT_EN,
                Language::Arabic => PREMIUM_TOOLKIT_AR,
            }
            .to_string(),
        );
    }

    sections.join("\n\n")
}

/// Neutral persona-only prompt used when assembly inputs are unavailable.
/// The engine falls back to this rather than failing the whole call.
pub fn fallback_prompt(persona: &PersonaDefinition, language: Language) -> String {
    let header = match language {
        Language::English => HEADER_EN,
        Language::Arabic => HEADER_AR,
    };
    let safety = match language {
        Language::English => SAFETY_RULES_EN,
        Language::Arabic => SAFETY_RULES_AR,
    };
    format!("{}\n\n{}\n\n{}", header, style_text(persona, language), safety)
}

fn dialect_guidance(language: Language, dialect: Option<&str>) -> String {
    match (language, dialect) {
        (Language::Arabic, Some(dialect)) if !dialect.trim().is_empty() => format!(
            "تحدث بالعربية، ويفضّل لهجة {}؛ تجنب الفصحى المتكلفة في المواساة.",
            dialect.trim()
        ),
        (Language::Arabic, _) => {
            "تحدث بالعربية بلغة دافئة بسيطة؛ تجنب الفصحى المتكلفة في المواساة.".to_string()
        }
        (Language::English, Some(dialect)) if !dialect.trim().is_empty() => format!(
            "Write natural, warm English ({} register); avoid clinical phrasing.",
            dialect.trim()
        ),
        (Language::English, _) => {
            "Write natural, warm English; avoid clinical phrasing.".to_string()
        }
    }
}

/// The structured block the generator is asked to honor. The free/fast tier
/// strips the deeper fields entirely (privacy and cost control); paid tiers
/// carry them.
fn emotion_state_block(ctx: &PromptContext<'_>) -> String {
    let mut lines = vec!["EMOTION_STATE:".to_string()];
    lines.push(format!(
        "  primaryEmotion: {}",
        ctx.emotion.primary.as_db_str()
    ));
    lines.push(format!("  intensity: {}", ctx.emotion.intensity));
    lines.push(format!(
        "  dominantTrend: {}",
        DominantTrend::derive(ctx.emotion).as_str()
    ));

    if ctx.tier.includes_deep_fields() {
        if !ctx.recent_events.is_empty() {
            lines.push(format!("  recentEvents: {}", ctx.recent_events.join("; ")));
        }
        if let Some(loop_tag) = ctx.loop_tag {
            lines.push(format!("  loopTag: {}", loop_tag));
        }
        if !ctx.anchors.is_empty() {
            lines.push(format!("  anchors: {}", ctx.anchors.join("; ")));
        }
        if let Some(reason) = ctx.reason_label {
            lines.push(format!("  reasonLabel: {}", reason));
        }
    }

    lines.join("\n")
}

fn long_term_block(profile: &UserEmotionProfile) -> String {
    let mut parts = Vec::new();
    for (label, score) in [
        ("sadness", profile.sadness),
        ("anxiety", profile.anxiety),
        ("anger", profile.anger),
        ("loneliness", profile.loneliness),
        ("hope", profile.hope),
        ("gratitude", profile.gratitude),
    ] {
        if score >= 0.2 {
            parts.push(format!("{} {:.2}", label, score));
        }
    }
    let tendency = profile
        .dominant_tendency()
        .map(|t| t.as_db_str())
        .unwrap_or("none");
    if parts.is_empty() {
        format!("Long-term tendency: {}.", tendency)
    } else {
        format!(
            "Long-term tendency: {} (notable: {}).",
            tendency,
            parts.join(", ")
        )
    }
}

fn trigger_block(triggers: &[Trigger]) -> String {
    let listed = triggers
        .iter()
        .take(3)
        .map(|t| format!("\"{}\" ({})", t.topic, t.emotion.as_db_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Sensitive recurring topics: {}. Do not raise these yourself; \
         if the user does, respond with extra care.",
        listed
    )
}
