//! # Conversation History
//!
//! Ordered, append-only (until cleared) log of conversation turns owned by
//! exactly one session. Insertion order is chronological order, and it is
//! the exact order the turns are sent to the generation backend.
//!
//! ## Looseness, documented:
//! Turns normally alternate User → Model, but the structure does not
//! enforce it. A caller appending two consecutive User turns (which the
//! session controller does after an interrupt cut a reply short) biases the
//! generation context; that is accepted behavior, not something to silently
//! repair.

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation
    User,
    /// The generation backend's side
    Model,
}

impl Role {
    /// Wire name used by the generation API (`"user"` / `"model"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One utterance in a conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    /// A turn spoken (or typed) by the user.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// A turn produced by the generation backend.
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Ordered log of turns with an optional bounded window.
///
/// ## Windowing policy:
/// Long-lived connections would otherwise grow their context (and
/// generation cost) without bound, so the history keeps at most
/// `max_turns` turns (`0` disables the bound). When the bound is
/// exceeded the *oldest* turns are dropped in whole pairs, so the
/// retained window keeps starting on a User turn. Summarization
/// was considered and rejected for this layer: it would change what the
/// generation backend sees in ways the client cannot predict.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl ConversationHistory {
    /// Create an empty history retaining at most `max_turns` turns
    /// (`0` = unbounded).
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    /// Append a turn, trimming the oldest turns if the window is exceeded.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);

        if self.max_turns > 0 && self.turns.len() > self.max_turns {
            let mut excess = self.turns.len() - self.max_turns;
            // Drop whole exchanges so the window keeps opening on a User
            // turn when appends alternate normally.
            if excess % 2 != 0 {
                excess += 1;
            }
            self.turns.drain(0..excess);
        }
    }

    /// The ordered sequence passed verbatim to the generation backend.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Discard every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
