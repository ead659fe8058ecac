// Save status: runtime-only state for the "last saved" indicator.

use chrono::{DateTime, Utc};

/// Where the most recent autosave stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    /// Nothing observed yet, or the pending window was cancelled
    #[default]
    Idle,
    /// A change is waiting out the debounce window
    Pending,
    /// A save callback is running
    Saving,
    /// The last save to finish succeeded
    Saved { at: DateTime<Utc> },
    /// The last save to finish failed; not retried until the next change
    Failed { message: String },
}

impl SaveStatus {
    /// Short label for status bar display.
    pub fn label(&self) -> String {
        match self {
            Self::Idle => String::new(),
            Self::Pending => "Unsaved changes".to_string(),
            Self::Saving => "Saving...".to_string(),
            Self::Saved { at } => format!("Saved {}", at.format("%H:%M:%S")),
            Self::Failed { message } => format!("Save failed: {message}"),
        }
    }

    /// Stable lowercase name, for logs and machine-readable output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Saving => "saving",
            Self::Saved { .. } => "saved",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// True once a save has run to completion, successfully or not
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Saved { .. } | Self::Failed { .. })
    }
}
