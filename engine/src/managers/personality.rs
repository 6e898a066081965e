//! Personality manager
//!
//! Publishes a fixed persona under [`BASE_PERSONALITY`]. The persona is
//! rendered once at construction and never changes afterwards, so every
//! request sees the same text.

use std::fmt::Write;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::manager::{Manager, ManagerId};
use sdk::state::{State, StateData, StateDataKey};
use serde::{Deserialize, Serialize};

pub const BASE_PERSONALITY: StateDataKey = StateDataKey::from_static("base_personality");

/// One line of example dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageExample {
    pub user: String,
    pub content: String,
}

impl MessageExample {
    pub fn new(user: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            content: content.into(),
        }
    }
}

/// Persona definition, loadable from TOML or JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Personality {
    pub name: String,
    pub description: String,
    pub style: Vec<String>,
    pub traits: Vec<String>,
    pub background: Vec<String>,
    pub expertise: Vec<String>,
    /// Multi-turn exchanges
    pub conversation_examples: Vec<Vec<MessageExample>>,
    pub message_examples: Vec<MessageExample>,
}

impl Personality {
    /// Render the persona as prompt text
    ///
    /// Sections appear in a fixed order with every item in declaration order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "- You are {}. {}\n", self.name, self.description);

        for (title, items) in [
            ("Communication Style", &self.style),
            ("Core Traits", &self.traits),
            ("Background", &self.background),
            ("Expertise and Limitations", &self.expertise),
        ] {
            let _ = writeln!(out, "# {}", title);
            for item in items {
                let _ = writeln!(out, "- {}", item);
            }
            out.push('\n');
        }

        out.push_str("# Conversation Examples\n");
        for conversation in &self.conversation_examples {
            for example in conversation {
                let _ = writeln!(out, "- [{}] {}", example.user, example.content);
            }
            out.push('\n');
        }

        out.push_str("# Message Examples\n");
        for example in &self.message_examples {
            let _ = writeln!(out, "- [{}] {}", example.user, example.content);
        }

        out
    }
}

pub struct PersonalityManager {
    personality: Personality,
    rendered: String,
}

impl PersonalityManager {
    pub const ID: &'static str = "personality";

    pub fn new(personality: Personality) -> Result<Self, EngineError> {
        if personality.name.trim().is_empty() {
            return Err(EngineError::Config("personality name cannot be empty".to_string()));
        }

        let rendered = personality.render();
        Ok(Self {
            personality,
            rendered,
        })
    }

    pub fn personality(&self) -> &Personality {
        &self.personality
    }
}

#[async_trait]
impl Manager for PersonalityManager {
    fn id(&self) -> ManagerId {
        ManagerId::new(Self::ID)
    }

    async fn context(&self, _state: &State) -> Result<Vec<StateData>, EngineError> {
        Ok(vec![StateData::new(BASE_PERSONALITY, self.rendered.clone())])
    }
}
