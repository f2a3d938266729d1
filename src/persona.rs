//! Static persona configuration: a read-only lookup table consumed by the
//! prompt assembler and response orchestrator.
//!
//! Rendered style text is memoized in a process-wide cache keyed by
//! `(persona_id, language)`. The cache is append-only and never invalidated,
//! which is safe only because persona definitions are immutable static data.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Language;

/// Style attributes, each in [0,1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersonaStyle {
    #[serde(default = "default_attr")]
    pub warmth: f32,
    #[serde(default = "default_attr")]
    pub humor: f32,
    #[serde(default = "default_attr")]
    pub directness: f32,
    #[serde(default = "default_attr")]
    pub energy: f32,
}

fn default_attr() -> f32 {
    0.5
}

impl Default for PersonaStyle {
    fn default() -> Self {
        Self {
            warmth: 0.5,
            humor: 0.5,
            directness: 0.5,
            energy: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDefinition {
    /// Filled from the overlay table key when loaded from TOML.
    #[serde(default)]
    pub id: String,
    pub role_description: String,
    #[serde(default)]
    pub style: PersonaStyle,
    #[serde(default)]
    pub specialties: Vec<String>,
}

pub const DEFAULT_PERSONA_ID: &str = "companion";

fn builtin_personas() -> Vec<PersonaDefinition> {
    vec![
        PersonaDefinition {
            id: DEFAULT_PERSONA_ID.to_string(),
            role_description: "A warm, attentive companion who listens first and keeps the \
                               conversation grounded in the user's own words."
                .to_string(),
            style: PersonaStyle {
                warmth: 0.85,
                humor: 0.35,
                directness: 0.4,
                energy: 0.5,
            },
            specialties: vec![
                "active listening".to_string(),
                "daily check-ins".to_string(),
            ],
        },
        PersonaDefinition {
            id: "coach".to_string(),
            role_description: "An encouraging coach who helps the user name small next steps \
                               without pushing."
                .to_string(),
            style: PersonaStyle {
                warmth: 0.6,
                humor: 0.5,
                directness: 0.75,
                energy: 0.8,
            },
            specialties: vec!["goal setting".to_string(), "motivation".to_string()],
        },
    ]
}

/// Read-only persona lookup table. Built-ins are always present; a TOML
/// overlay file can add or replace definitions at construction time.
pub struct PersonaRegistry {
    personas: HashMap<String, PersonaDefinition>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        let mut personas = HashMap::new();
        for persona in builtin_personas() {
            personas.insert(persona.id.clone(), persona);
        }
        Self { personas }
    }
}

impl PersonaRegistry {
    pub fn with_overlay<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut registry = Self::default();
        let raw = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read persona overlay {}", path.as_ref().display())
        })?;
        let overlay: HashMap<String, PersonaDefinition> =
            toml::from_str(&raw).context("Failed to parse persona overlay")?;
        for (id, mut persona) in overlay {
            persona.id = id.clone();
            registry.personas.insert(id, persona);
        }
        Ok(registry)
    }

    pub fn lookup(&self, persona_id: &str) -> Option<&PersonaDefinition> {
        self.personas.get(persona_id.trim())
    }

    /// Lookup with fallback to the default companion persona.
    pub fn lookup_or_default(&self, persona_id: &str) -> &PersonaDefinition {
        self.lookup(persona_id)
            .or_else(|| self.personas.get(DEFAULT_PERSONA_ID))
            .expect("built-in default persona always present")
    }
}

fn style_cache() -> &'static Mutex<HashMap<(String, Language), String>> {
    static CACHE: OnceLock<Mutex<HashMap<(String, Language), String>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn attr_word(value: f32, low: &str, mid: &str, high: &str) -> String {
    if value >= 0.66 {
        high.to_string()
    } else if value >= 0.33 {
        mid.to_string()
    } else {
        low.to_string()
    }
}

fn render_style_text(persona: &PersonaDefinition, language: Language) -> String {
    let style = &persona.style;
    let mut lines = Vec::new();
    match language {
        Language::English => {
            lines.push(format!("Persona: {}", persona.role_description));
            lines.push(format!(
                "Voice: {} warmth, {} humor, {} directness, {} energy.",
                attr_word(style.warmth, "low", "moderate", "high"),
                attr_word(style.humor, "minimal", "light", "playful"),
                attr_word(style.directness, "gentle", "balanced", "direct"),
                attr_word(style.energy, "calm", "steady", "lively"),
            ));
            if !persona.specialties.is_empty() {
                lines.push(format!("Specialties: {}.", persona.specialties.join(", ")));
            }
        }
        Language::Arabic => {
            lines.push(format!("الشخصية: {}", persona.role_description));
            lines.push(format!(
                "الأسلوب: دفء {}، دعابة {}، مباشرة {}، حيوية {}.",
                attr_word(style.warmth, "منخفض", "متوسط", "عالٍ"),
                attr_word(style.humor, "قليلة", "خفيفة", "مرحة"),
                attr_word(style.directness, "لطيفة", "متوازنة", "صريحة"),
                attr_word(style.energy, "هادئة", "ثابتة", "نشيطة"),
            ));
            if !persona.specialties.is_empty() {
                lines.push(format!("التخصصات: {}.", persona.specialties.join("، ")));
            }
        }
    }
    lines.join("\n")
}

/// Memoized persona style text for prompt assembly. Deterministic for a
/// given `(persona_id, language)` pair.
pub fn style_text(persona: &PersonaDefinition, language: Language) -> String {
    let key = (persona.id.clone(), language);
    let cache = style_cache();
    if let Ok(guard) = cache.lock() {
        if let Some(cached) = guard.get(&key) {
            return cached.clone();
        }
    }
    let rendered = render_style_text(persona, language);
    if let Ok(mut guard) = cache.lock() {
        guard.entry(key).or_insert_with(|| rendered.clone());
    }
    rendered
}
