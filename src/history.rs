use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub request: String,          // What the user typed
    pub command: String,          // Command it was translated into
    pub timestamp: DateTime<Utc>, // When the translation succeeded
}

impl HistoryEntry {
    pub fn new(request: &str, command: &str) -> Self {
        Self {
            request: request.trim().to_string(),
            command: command.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Most recent translations, oldest first, capped at `limit`.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
