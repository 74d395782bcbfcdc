use crate::analysis::{PerformanceAssessment, Strategy};
use crate::types::{Message, Role};

/// Messages given to the strategy stage: the last three exchanges.
pub const STRATEGY_WINDOW: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn transcript(&self) -> String {
        format_transcript(&self.messages)
    }

    pub fn recent_transcript(&self, count: usize) -> String {
        let start = self.messages.len().saturating_sub(count);
        format_transcript(&self.messages[start..])
    }
}

pub fn format_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match msg.role {
            Role::User => out.push_str("User: "),
            Role::Assistant => out.push_str("AI: "),
        }
        out.push_str(&msg.content);
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    pub total_messages: u32,
    pub peak_progress: u8,
    pub strategy_history: Vec<Strategy>,
}

impl SessionMetrics {
    pub fn record_turn(&mut self, performance: &PerformanceAssessment, strategy: &Strategy) {
        self.total_messages += 1;
        self.peak_progress = self.peak_progress.max(performance.progress_score);
        self.strategy_history.push(strategy.clone());
    }

    pub fn recent_strategies(&self, count: usize) -> &[Strategy] {
        let start = self.strategy_history.len().saturating_sub(count);
        &self.strategy_history[start..]
    }
}

/// Everything a chat session remembers between turns.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub history: ConversationHistory,
    pub metrics: SessionMetrics,
    pub debug_mode: bool,
}

impl SessionState {
    pub fn new(debug_mode: bool) -> Self {
        Self {
            history: ConversationHistory::default(),
            metrics: SessionMetrics::default(),
            debug_mode,
        }
    }

    /// Flips the debug panel and returns the new setting.
    pub fn toggle_debug(&mut self) -> bool {
        self.debug_mode = !self.debug_mode;
        self.debug_mode
    }
}
