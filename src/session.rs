//! Conversation sessions.
//!
//! A [`Session`] is the append-only record of one user's conversation: user
//! utterances, assistant messages (with the calls they proposed), capability
//! results, memory notes and the one-time persona directive. The
//! [`SessionStore`] hands out one `Mutex<Session>` per opaque key so that
//! overlapping requests for the same key run one after another.

use crate::capability::{CapabilityCall, CapabilityResult};
use crate::llm::ChatMessage;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub ordinal: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEntry {
    Directive(String),
    User(Utterance),
    Assistant {
        text: String,
        calls: Vec<CapabilityCall>,
    },
    CapabilityResult(CapabilityResult),
    MemoryNote(String),
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    key: String,
    turns: Vec<TurnEntry>,
    utterances: usize,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn turns(&self) -> &[TurnEntry] {
        &self.turns
    }

    /// Append a user utterance and return it with its ordinal (1-based).
    pub fn push_user(&mut self, text: &str) -> Utterance {
        self.utterances += 1;
        let utterance = Utterance {
            ordinal: self.utterances,
            text: text.to_string(),
        };
        self.turns.push(TurnEntry::User(utterance.clone()));
        utterance
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, calls: Vec<CapabilityCall>) {
        self.turns.push(TurnEntry::Assistant {
            text: text.into(),
            calls,
        });
    }

    pub fn push_result(&mut self, result: CapabilityResult) {
        self.turns.push(TurnEntry::CapabilityResult(result));
    }

    /// Store a tagged preference note and return the note text.
    pub fn push_memory_note(&mut self, item: &str) -> String {
        let note = format!("[USER PREFERENCE: {item}]");
        self.turns.push(TurnEntry::MemoryNote(note.clone()));
        note
    }

    /// Record the persona directive unless one is already present.
    pub fn record_directive(&mut self, directive: &str) -> bool {
        if self.has_directive() {
            return false;
        }
        debug!("Recording persona directive for session {}", self.key);
        self.turns.push(TurnEntry::Directive(directive.to_string()));
        true
    }

    #[must_use]
    pub fn has_directive(&self) -> bool {
        self.turns.iter().any(|t| matches!(t, TurnEntry::Directive(_)))
    }

    /// The last `n` non-empty user/assistant texts, oldest first.
    #[must_use]
    pub fn recent_texts(&self, n: usize) -> Vec<String> {
        let mut texts: Vec<String> = self
            .turns
            .iter()
            .rev()
            .filter_map(|t| match t {
                TurnEntry::User(u) => Some(u.text.as_str()),
                TurnEntry::Assistant { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .filter(|t| !t.trim().is_empty())
            .take(n)
            .map(str::to_string)
            .collect();
        texts.reverse();
        texts
    }

    #[must_use]
    pub fn memory_notes(&self) -> Vec<&str> {
        self.turns
            .iter()
            .filter_map(|t| match t {
                TurnEntry::MemoryNote(note) => Some(note.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Calls proposed across the whole session, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&CapabilityCall> {
        self.turns
            .iter()
            .filter_map(|t| match t {
                TurnEntry::Assistant { calls, .. } => Some(calls.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// History in the shape the language model consumes.
    #[must_use]
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|t| match t {
                TurnEntry::Directive(text) | TurnEntry::MemoryNote(text) => ChatMessage::system(text.clone()),
                TurnEntry::User(u) => ChatMessage::user(u.text.clone()),
                TurnEntry::Assistant { text, calls } => ChatMessage::assistant(text.clone(), calls.clone()),
                TurnEntry::CapabilityResult(r) => ChatMessage::tool(r.call_id.clone(), r.text.clone()),
            })
            .collect()
    }
}

/// Lock a session, recovering the data if a previous holder panicked.
pub fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `key`, created on first use.
    pub fn get(&self, key: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(key)))),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
