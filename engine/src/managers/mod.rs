//! Bundled managers
//!
//! - `personality`: static persona published as prompt context
//! - `insight`: extracts durable facts from conversations through the LLM

pub mod insight;
pub mod personality;

pub use insight::{InsightManager, ACTOR_INSIGHTS, SESSION_INSIGHTS, UNIQUE_INSIGHTS};
pub use personality::{MessageExample, Personality, PersonalityManager, BASE_PERSONALITY};
