//! Conversation State
//!
//! The single shared state threaded through every stage of a run. The
//! transcript is append-only; stage summaries land in a scratch map keyed
//! by stage name, so downstream stages and the final report can read them
//! without replaying the transcript.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ChatRole, ToolRequest};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
    scratch: BTreeMap<String, String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run from a user goal.
    pub fn with_goal(goal: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.push(ChatMessage::user(goal));
        state
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Tool requests declared by the most recent message, if it is an
    /// assistant message carrying any. Anything else means there is no
    /// pending tool work.
    pub fn pending_tool_requests(&self) -> &[ToolRequest] {
        match self.messages.last() {
            Some(m) if m.role == ChatRole::Assistant => {
                m.tool_calls.as_deref().unwrap_or(&[])
            }
            _ => &[],
        }
    }

    pub fn set_scratch(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.scratch.insert(key.into(), value.into());
    }

    pub fn scratch(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    pub fn scratch_entries(&self) -> &BTreeMap<String, String> {
        &self.scratch
    }

    /// The last substantive assistant message: content present, no tool
    /// requests attached. This is what a finished run reports as its answer.
    pub fn final_answer(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| {
            let toolless = m.tool_calls.as_ref().map_or(true, Vec::is_empty);
            if m.role == ChatRole::Assistant && toolless && !m.content.is_empty() {
                Some(m.content.as_str())
            } else {
                None
            }
        })
    }
}
