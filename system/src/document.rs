use crate::operation::{Operation, OperationKind, OperationLog};

pub const WELCOME_TEXT: &str =
    "# Welcome to SYNCOUT!\n# Start typing to collaborate...\n\nprint('Hello, World!')\n";
pub const DEFAULT_LANGUAGE: &str = "python";

/// Text of one session together with its revision counter and edit history.
///
/// Edits are applied last-writer-wins: offsets are clamped to the current text
/// and no attempt is made to rebase edits issued against an older revision.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    language: String,
    revision: u64,
    history: OperationLog,
}

impl Document {
    pub fn new() -> Self {
        Self::with_text(WELCOME_TEXT)
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: DEFAULT_LANGUAGE.to_owned(),
            revision: 0,
            history: OperationLog::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn history(&self) -> &OperationLog {
        &self.history
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Applies `op`, records it and returns the new revision.
    pub fn apply(&mut self, op: Operation) -> u64 {
        match op.kind {
            OperationKind::Insert => {
                let at = self.byte_offset(self.clamp(op.position));
                self.text.insert_str(at, &op.content);
            }
            OperationKind::Delete => {
                let start = self.clamp(op.position);
                let end = self.clamp(op.position.saturating_add(op.length));
                if start < end {
                    let range = self.byte_offset(start)..self.byte_offset(end);
                    self.text.replace_range(range, "");
                }
            }
            OperationKind::FullUpdate => {
                self.text = op.content.clone();
            }
        }
        self.revision += 1;
        self.history.push(op);
        self.revision
    }

    fn clamp(&self, position: i64) -> usize {
        let len = self.len();
        if position <= 0 {
            0
        } else {
            (position as u64).min(len as u64) as usize
        }
    }

    fn byte_offset(&self, char_offset: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_offset)
            .map(|(i, _)| i)
            .unwrap_or_else(|| self.text.len())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
