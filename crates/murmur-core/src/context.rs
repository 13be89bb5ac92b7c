//! Standing user context.
//!
//! A user-configured, cross-session fact set that can be injected into the
//! outbound message list as an additional system instruction. Injection is
//! gated per assistant by an allow-list or a global apply-to-all flag.

use crate::conversation::message::{ApiMessage, MessageRole};
use serde::{Deserialize, Serialize};

/// User-configured facts to carry across conversations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandingContext {
    /// Free-form facts about the user.
    pub facts: String,
    /// When true, the facts apply to every assistant and the main session.
    #[serde(default)]
    pub apply_to_all: bool,
    /// Assistants explicitly allowed to see the facts.
    #[serde(default)]
    pub allowed_assistant_ids: Vec<String>,
}

impl StandingContext {
    /// Whether the context applies to the given assistant.
    ///
    /// `assistant_id` is `None` for the main session, which only receives
    /// the context under the apply-to-all flag.
    pub fn applies_to(&self, assistant_id: Option<&str>) -> bool {
        if self.facts.trim().is_empty() {
            return false;
        }
        if self.apply_to_all {
            return true;
        }
        match assistant_id {
            Some(id) => self.allowed_assistant_ids.iter().any(|a| a == id),
            None => false,
        }
    }

    /// The system-instruction text carrying the facts.
    fn as_instruction(&self) -> String {
        format!(
            "Remember these facts about the user: {}",
            self.facts.trim()
        )
    }
}

/// Injects the standing context into an outbound message list.
///
/// When the context applies, its instruction is prepended to an existing
/// leading system entry, or inserted as a new leading entry if the list
/// starts with a non-system message. Otherwise the list is untouched.
pub fn inject_standing_context(
    messages: &mut Vec<ApiMessage>,
    context: &StandingContext,
    assistant_id: Option<&str>,
) {
    if !context.applies_to(assistant_id) {
        return;
    }

    let instruction = context.as_instruction();
    match messages.first_mut() {
        Some(first) if first.role == MessageRole::System => {
            first.content = format!("{}\n\n{}", instruction, first.content);
        }
        _ => {
            messages.insert(0, ApiMessage::system(instruction));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(facts: &str, apply_to_all: bool, allowed: &[&str]) -> StandingContext {
        StandingContext {
            facts: facts.to_string(),
            apply_to_all,
            allowed_assistant_ids: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn not_injected_when_assistant_not_allowed() {
        let mut messages = vec![ApiMessage::new(MessageRole::User, "hi")];
        inject_standing_context(&mut messages, &context("likes Rust", false, &["a-1"]), Some("a-2"));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn injected_for_allow_listed_assistant() {
        let mut messages = vec![ApiMessage::new(MessageRole::User, "hi")];
        inject_standing_context(&mut messages, &context("likes Rust", false, &["a-1"]), Some("a-1"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains("likes Rust"));
    }

    #[test]
    fn prepends_to_existing_system_entry() {
        let mut messages = vec![
            ApiMessage::system("You are terse."),
            ApiMessage::new(MessageRole::User, "hi"),
        ];
        inject_standing_context(&mut messages, &context("likes Rust", true, &[]), Some("a-1"));
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.starts_with("Remember these facts"));
        assert!(messages[0].content.ends_with("You are terse."));
    }

    #[test]
    fn main_session_only_under_apply_to_all() {
        let mut messages = vec![ApiMessage::new(MessageRole::User, "hi")];
        inject_standing_context(&mut messages, &context("likes Rust", false, &["a-1"]), None);
        assert_eq!(messages.len(), 1);

        inject_standing_context(&mut messages, &context("likes Rust", true, &[]), None);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn blank_facts_never_inject() {
        let mut messages = vec![ApiMessage::new(MessageRole::User, "hi")];
        inject_standing_context(&mut messages, &context("   ", true, &[]), Some("a-1"));
        assert_eq!(messages.len(), 1);
    }
}
