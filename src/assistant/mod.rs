//! Companion assistant replies
//!
//! Replies come from a `ResponseProvider` so a real backend can replace the
//! canned one without touching the API layer.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Companion screens that talk back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanionMode {
    Study,
    Friendly,
}

impl CompanionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "study" => Some(CompanionMode::Study),
            "friendly" => Some(CompanionMode::Friendly),
            _ => None,
        }
    }
}

/// Source of assistant replies
#[async_trait]
pub trait ResponseProvider: Send + Sync {
    /// Reply to a user message in the given mode
    async fn respond(&self, mode: CompanionMode, prompt: &str) -> String;

    /// A short wellness tip
    async fn wellness_tip(&self) -> String;

    /// Get the provider name
    fn name(&self) -> &'static str;
}

const FRIENDLY_REPLIES: &[&str] = &[
    "That sounds wonderful! I'm here to support you every step of the way.",
    "You're doing amazing! Remember, small steps lead to big changes.",
    "I love your positive energy! How can I help you achieve your goals today?",
    "That's so thoughtful of you to share that with me. I'm always here to listen!",
];

const WELLNESS_TIPS: &[&str] = &[
    "Stay hydrated! Your body needs water to function at its best.",
    "Try adding some leafy greens to your meals today.",
    "Take 5 deep breaths right now. Feel how that centers you?",
    "A short walk can boost your mood and energy instantly!",
    "Quality sleep is your superpower, aim for 7-8 hours tonight!",
];

/// Offline provider picking from fixed replies
#[derive(Debug, Default)]
pub struct CannedResponseProvider;

impl CannedResponseProvider {
    pub fn new() -> Self {
        Self
    }

    fn pick(options: &[&str]) -> String {
        options
            .choose(&mut rand::thread_rng())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResponseProvider for CannedResponseProvider {
    async fn respond(&self, mode: CompanionMode, prompt: &str) -> String {
        match mode {
            CompanionMode::Study => format!(
                "That's a great question! Here's what I know about \"{}\": this is an offline reply, \
                 connect a real assistant backend for full answers.",
                prompt.trim()
            ),
            CompanionMode::Friendly => Self::pick(FRIENDLY_REPLIES),
        }
    }

    async fn wellness_tip(&self) -> String {
        Self::pick(WELLNESS_TIPS)
    }

    fn name(&self) -> &'static str {
        "canned"
    }
}
