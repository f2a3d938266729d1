//! Post-processing of the generator's raw reply: tone softening, trigger
//! avoidance, state-specific rewrites and the safety-footer policy.
//!
//! Every step is independently skippable and purely local; the pipeline as a
//! whole can never fail, so the worst case is the untouched raw reply.

use regex_lite::Regex;

use crate::config::Language;
use crate::emotion::state_machine::ConversationState;
use crate::emotion::triggers::Trigger;
use crate::emotion::{Emotion, SeverityLevel};
use crate::persona::PersonaStyle;

/// Directive phrasing softened per language: pattern, replacement.
const SOFTEN_RULES_EN: &[(&str, &str)] = &[
    ("(?i)\\byou must\\b", "you might"),
    ("(?i)\\byou have to\\b", "you could"),
    ("(?i)\\byou should\\b", "you could"),
    ("(?i)\\byou need to\\b", "it may help to"),
];

const SOFTEN_RULES_AR: &[(&str, &str)] = &[
    ("لازم", "يمكن"),
    ("يجب أن", "قد يساعد أن"),
    ("يجب ان", "قد يساعد ان"),
    ("عليك أن", "يمكنك أن"),
];

/// How many top-ranked triggers are redacted from the reply.
const REDACTED_TRIGGER_COUNT: usize = 3;

const TRIGGER_PLACEHOLDER_EN: &str = "that topic";
const TRIGGER_PLACEHOLDER_AR: &str = "هذا الموضوع";

/// Maximum sentences kept in a SAD_SUPPORT reply.
const SAD_SUPPORT_MAX_SENTENCES: usize = 3;

const CRISIS_FOOTER_EN: &str = "\n\nIf things feel like too much right now, please consider \
reaching out to someone you trust or a local crisis line — you deserve real support, and you \
don't have to carry this alone.";
const CRISIS_FOOTER_AR: &str = "\n\nإذا كان كل شيء يبدو أثقل من أن يُحتمل الآن، فكّر من فضلك في \
التواصل مع شخص تثق به أو مع خط مساعدة محلي — أنت تستحق دعماً حقيقياً، ولست مضطراً لحمل هذا وحدك.";

const MILD_DISCLAIMER_EN: &str = "\n\nI'm here with you, though I'm a companion rather than a \
professional — talking to someone you trust can also help.";
const MILD_DISCLAIMER_AR: &str = "\n\nأنا هنا معك، لكنني رفيق ولست مختصاً — الحديث مع شخص تثق \
به قد يساعد أيضاً.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmpathyLevel {
    High,
    Medium,
    Low,
}

fn empathy_openers(level: EmpathyLevel, language: Language) -> &'static [&'static str] {
    match (level, language) {
        (EmpathyLevel::High, Language::English) => &[
            "I'm really glad you told me this. ",
            "Thank you for trusting me with this. ",
        ],
        (EmpathyLevel::Medium, Language::English) => {
            &["I hear you. ", "That sounds like a lot. "]
        }
        (EmpathyLevel::Low, Language::English) => &[""],
        (EmpathyLevel::High, Language::Arabic) => &[
            "أنا ممتن لأنك شاركتني هذا. ",
            "شكراً لثقتك بي في هذا الأمر. ",
        ],
        (EmpathyLevel::Medium, Language::Arabic) => &["أنا أسمعك. ", "يبدو أن هذا كثير عليك. "],
        (EmpathyLevel::Low, Language::Arabic) => &[""],
    }
}

fn state_opening(state: ConversationState, language: Language) -> Option<&'static str> {
    match (state, language) {
        (ConversationState::AnxietyCalming, Language::English) => {
            Some("Let's take this slowly, one piece at a time. ")
        }
        (ConversationState::AngerDeescalate, Language::English) => {
            Some("Your frustration makes sense. ")
        }
        (ConversationState::LonelyCompanionship, Language::English) => {
            Some("I'm right here with you. ")
        }
        (ConversationState::HopeGuidance, Language::English) => {
            Some("It's good to hear some light in your words. ")
        }
        (ConversationState::AnxietyCalming, Language::Arabic) => {
            Some("لنأخذ الأمر بهدوء، خطوة خطوة. ")
        }
        (ConversationState::AngerDeescalate, Language::Arabic) => Some("غضبك مفهوم تماماً. "),
        (ConversationState::LonelyCompanionship, Language::Arabic) => Some("أنا هنا معك. "),
        (ConversationState::HopeGuidance, Language::Arabic) => {
            Some("جميل أن أسمع بعض الأمل في كلماتك. ")
        }
        _ => None,
    }
}

/// Post-process one raw reply. All steps are pure string transforms; the
/// function cannot fail.
pub fn rewrite(
    raw_reply: &str,
    emotion: &Emotion,
    state: ConversationState,
    triggers: &[Trigger],
    language: Language,
    persona_style: &PersonaStyle,
) -> String {
    let mut reply = raw_reply.to_string();

    // (a) lexical softening of directive phrasing
    reply = soften(&reply, language);

    // (b) trigger-aware redaction of the top topics
    reply = redact_triggers(&reply, triggers, language);

    // (c) state-specific rewrite
    reply = state_rewrite(&reply, state, language);

    // (d) tone-profile opener, guarded against double-prepending
    reply = apply_empathy_opener(&reply, emotion.severity, persona_style, language);

    // (e) safety-footer policy
    reply = apply_safety_footer(&reply, emotion, state, language);

    reply
}

fn soften(reply: &str, language: Language) -> String {
    let rules = match language {
        Language::English => SOFTEN_RULES_EN,
        Language::Arabic => SOFTEN_RULES_AR,
    };
    let mut out = reply.to_string();
    for (pattern, replacement) in rules {
        match Regex::new(pattern) {
            Ok(re) => out = re.replace_all(&out, *replacement).into_owned(),
            Err(e) => {
                tracing::warn!("Skipping softening rule {}: {}", pattern, e);
            }
        }
    }
    out
}

/// Replace whole-word occurrences of the top trigger topics with a neutral
/// placeholder. Word boundaries are computed over alphanumeric runs so the
/// matching is Unicode-correct for Arabic as well.
fn redact_triggers(reply: &str, triggers: &[Trigger], language: Language) -> String {
    let placeholder = match language {
        Language::English => TRIGGER_PLACEHOLDER_EN,
        Language::Arabic => TRIGGER_PLACEHOLDER_AR,
    };

    let topics: Vec<String> = triggers
        .iter()
        .take(REDACTED_TRIGGER_COUNT)
        .map(|t| t.topic.to_lowercase())
        .collect();
    if topics.is_empty() {
        return reply.to_string();
    }

    let mut out = String::with_capacity(reply.len());
    let mut word = String::new();
    for c in reply.chars() {
        if c.is_alphanumeric() {
            word.push(c);
            continue;
        }
        flush_word(&mut out, &mut word, &topics, placeholder);
        out.push(c);
    }
    flush_word(&mut out, &mut word, &topics, placeholder);
    out
}

fn flush_word(out: &mut String, word: &mut String, topics: &[String], placeholder: &str) {
    if word.is_empty() {
        return;
    }
    if topics.iter().any(|t| *t == word.to_lowercase()) {
        out.push_str(placeholder);
    } else {
        out.push_str(word);
    }
    word.clear();
}

fn state_rewrite(reply: &str, state: ConversationState, language: Language) -> String {
    if state == ConversationState::SadSupport {
        return truncate_sentences(reply, SAD_SUPPORT_MAX_SENTENCES);
    }
    if let Some(opening) = state_opening(state, language) {
        if !reply.trim_start().starts_with(opening.trim_end()) {
            return format!("{}{}", opening, reply);
        }
    }
    reply.to_string()
}

fn truncate_sentences(reply: &str, max_sentences: usize) -> String {
    let mut out = String::new();
    let mut count = 0;
    for c in reply.chars() {
        out.push(c);
        if matches!(c, '.' | '!' | '?' | '؟' | '؛') {
            count += 1;
            if count >= max_sentences {
                break;
            }
        }
    }
    out.trim_end().to_string()
}

fn empathy_level(severity: SeverityLevel, style: &PersonaStyle) -> EmpathyLevel {
    match severity {
        SeverityLevel::HighRisk => EmpathyLevel::High,
        SeverityLevel::Support => {
            if style.warmth >= 0.6 {
                EmpathyLevel::High
            } else {
                EmpathyLevel::Medium
            }
        }
        SeverityLevel::Venting => {
            if style.warmth >= 0.6 || style.humor < 0.3 {
                EmpathyLevel::Medium
            } else {
                EmpathyLevel::Low
            }
        }
        SeverityLevel::Casual => EmpathyLevel::Low,
    }
}

fn apply_empathy_opener(
    reply: &str,
    severity: SeverityLevel,
    style: &PersonaStyle,
    language: Language,
) -> String {
    let level = empathy_level(severity, style);
    let openers = empathy_openers(level, language);
    let chosen = match openers.iter().find(|o| !o.is_empty()) {
        Some(opener) => *opener,
        None => return reply.to_string(),
    };

    // Idempotence guard: skip when the reply already starts with any known
    // opener phrase for this language.
    let trimmed = reply.trim_start();
    for candidate_level in [EmpathyLevel::High, EmpathyLevel::Medium] {
        for opener in empathy_openers(candidate_level, language) {
            if !opener.is_empty() && trimmed.starts_with(opener.trim_end()) {
                return reply.to_string();
            }
        }
    }

    format!("{}{}", chosen, reply)
}

fn apply_safety_footer(
    reply: &str,
    emotion: &Emotion,
    state: ConversationState,
    language: Language,
) -> String {
    let (crisis, mild) = match language {
        Language::English => (CRISIS_FOOTER_EN, MILD_DISCLAIMER_EN),
        Language::Arabic => (CRISIS_FOOTER_AR, MILD_DISCLAIMER_AR),
    };

    let needs_crisis_footer = emotion.severity == SeverityLevel::HighRisk
        || (emotion.primary.is_negative() && emotion.intensity >= 3 && state.is_support_state());

    if needs_crisis_footer {
        if reply.contains(crisis.trim()) {
            return reply.to_string();
        }
        return format!("{}{}", reply, crisis);
    }

    if matches!(
        emotion.severity,
        SeverityLevel::Venting | SeverityLevel::Support
    ) {
        if reply.contains(mild.trim()) {
            return reply.to_string();
        }
        return format!("{}{}", reply, mild);
    }

    reply.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{CultureTag, PrimaryEmotion};

    fn emotion(primary: PrimaryEmotion, intensity: u8, severity: SeverityLevel) -> Emotion {
        Emotion::new(primary, intensity, 0.8, CultureTag::English, severity, None)
    }

    fn style() -> PersonaStyle {
        PersonaStyle {
            warmth: 0.85,
            humor: 0.35,
            directness: 0.4,
            energy: 0.5,
        }
    }

    fn trigger(topic: &str) -> Trigger {
        Trigger {
            topic: topic.to_string(),
            emotion: PrimaryEmotion::Sad,
            score: 1.0,
        }
    }

    #[test]
    fn softening_replaces_directive_phrasing() {
        let out = soften("You must rest. you should sleep more.", Language::English);
        assert!(!out.to_lowercase().contains("you must"));
        assert!(!out.to_lowercase().contains("you should"));
        assert!(out.contains("you might") || out.contains("you could"));

        let out = soften("لازم تنام مبكراً", Language::Arabic);
        assert!(!out.contains("لازم"));
        assert!(out.contains("يمكن"));
    }

    #[test]
    fn trigger_redaction_is_whole_word_only() {
        let triggers = vec![trigger("exam")];
        let out = redact_triggers(
            "The exam is near, but examining feelings helps.",
            &triggers,
            Language::English,
        );
        assert!(out.contains("that topic is near"));
        assert!(out.contains("examining"));
    }

    #[test]
    fn only_top_three_triggers_are_redacted() {
        let triggers: Vec<Trigger> =
            ["alpha", "beta", "gamma", "delta"].iter().map(|t| trigger(t)).collect();
        let out = redact_triggers("alpha beta gamma delta", &triggers, Language::English);
        assert!(!out.contains("alpha"));
        assert!(!out.contains("gamma"));
        assert!(out.contains("delta"));
    }

    #[test]
    fn sad_support_truncates_to_three_sentences() {
        let raw = "One. Two. Three. Four. Five.";
        let out = state_rewrite(raw, ConversationState::SadSupport, Language::English);
        assert_eq!(out, "One. Two. Three.");
    }

    #[test]
    fn calming_states_prepend_opening_once() {
        let raw = "Try naming what worries you.";
        let once = state_rewrite(raw, ConversationState::AnxietyCalming, Language::English);
        assert!(once.starts_with("Let's take this slowly"));
        let twice = state_rewrite(&once, ConversationState::AnxietyCalming, Language::English);
        assert_eq!(once, twice);
    }

    #[test]
    fn empathy_opener_is_idempotent() {
        let emo = emotion(PrimaryEmotion::Sad, 4, SeverityLevel::Support);
        let first = apply_empathy_opener("it sounds hard.", emo.severity, &style(), Language::English);
        let second = apply_empathy_opener(&first, emo.severity, &style(), Language::English);
        assert_eq!(first, second);
    }

    #[test]
    fn casual_severity_gets_no_opener() {
        let out = apply_empathy_opener("hey!", SeverityLevel::Casual, &style(), Language::English);
        assert_eq!(out, "hey!");
    }

    #[test]
    fn high_risk_always_appends_crisis_footer_exactly_once() {
        let emo = emotion(PrimaryEmotion::Neutral, 1, SeverityLevel::HighRisk);
        let out = rewrite(
            "I'm here.",
            &emo,
            ConversationState::Neutral,
            &[],
            Language::English,
            &style(),
        );
        assert_eq!(out.matches("crisis line").count(), 1);

        // Running the orchestrator again must not duplicate the footer.
        let again = rewrite(
            &out,
            &emo,
            ConversationState::Neutral,
            &[],
            Language::English,
            &style(),
        );
        assert_eq!(again.matches("crisis line").count(), 1);
    }

    #[test]
    fn intense_negative_emotion_in_support_state_gets_crisis_footer() {
        let emo = emotion(PrimaryEmotion::Sad, 4, SeverityLevel::Support);
        let out = apply_safety_footer("text", &emo, ConversationState::SadSupport, Language::English);
        assert!(out.contains("crisis line"));

        // Same emotion outside a support state only earns the mild disclaimer.
        let out = apply_safety_footer("text", &emo, ConversationState::Neutral, Language::English);
        assert!(!out.contains("crisis line"));
        assert!(out.contains("companion rather than a professional"));
    }

    #[test]
    fn venting_without_crisis_condition_gets_mild_disclaimer() {
        let emo = emotion(PrimaryEmotion::Anxious, 2, SeverityLevel::Venting);
        let out = apply_safety_footer("text", &emo, ConversationState::Neutral, Language::English);
        assert!(out.contains("companion rather than a professional"));
    }

    #[test]
    fn casual_turn_gets_no_footer() {
        let emo = emotion(PrimaryEmotion::Neutral, 1, SeverityLevel::Casual);
        let out = apply_safety_footer("text", &emo, ConversationState::Neutral, Language::English);
        assert_eq!(out, "text");
    }

    #[test]
    fn arabic_pipeline_stays_arabic() {
        let emo = emotion(PrimaryEmotion::Lonely, 4, SeverityLevel::Support);
        let out = rewrite(
            "لازم تخرج من البيت أكثر",
            &emo,
            ConversationState::LonelyCompanionship,
            &[],
            Language::Arabic,
            &style(),
        );
        assert!(out.contains("يمكن"));
        assert!(out.contains("أنا هنا معك"));
        assert!(out.contains("خط مساعدة محلي"));
    }
}
