use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRole {
    User,
    AI,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "User"),
            ChatRole::AI => write!(f, "AI"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl fmt::Display for ChatTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// Session-scoped conversation memory: append-only while the session lives,
/// discarded when it ends. Never persisted.
#[derive(Debug, Default, Clone)]
pub struct ChatMemory {
    turns: Vec<ChatTurn>,
}

impl ChatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a completed question/answer exchange.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.turns.push(ChatTurn {
            role: ChatRole::User,
            content: question.to_string(),
        });
        self.turns.push(ChatTurn {
            role: ChatRole::AI,
            content: answer.to_string(),
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// helper function to format a slice of turns for the prompt
pub fn format_history(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("{turn}"))
        .collect::<Vec<String>>()
        .join("\n")
}
