use crate::types::ChatTurn;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Saved conversation of an interpreter session
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Conversation {
    pub saved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub turns: Vec<ChatTurn>,
}

pub trait ConversationPersistence: Send + Sync {
    fn save(&mut self, turns: &[ChatTurn]) -> Result<()>;
    fn load(&mut self) -> Result<Option<Conversation>>;
    fn cleanup(&mut self) -> Result<()>;
}

pub struct FileConversationPersistence {
    path: PathBuf,
}

impl FileConversationPersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ConversationPersistence for FileConversationPersistence {
    fn save(&mut self, turns: &[ChatTurn]) -> Result<()> {
        let conversation = Conversation {
            saved_at: Some(chrono::Utc::now()),
            turns: turns.to_vec(),
        };
        debug!("Saving conversation to {}", self.path.display());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
        }
        let json = serde_json::to_string_pretty(&conversation)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Conversation>> {
        if !self.path.exists() {
            return Ok(None);
        }

        debug!("Loading conversation from {}", self.path.display());
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let conversation = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(conversation))
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.path.exists() {
            debug!("Removing conversation file {}", self.path.display());
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockConversationPersistence {
    pub saved: std::sync::Arc<std::sync::Mutex<Option<Conversation>>>,
}

#[cfg(test)]
impl ConversationPersistence for MockConversationPersistence {
    fn save(&mut self, turns: &[ChatTurn]) -> Result<()> {
        *self.saved.lock().unwrap() = Some(Conversation {
            saved_at: None,
            turns: turns.to_vec(),
        });
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Conversation>> {
        Ok(self.saved.lock().unwrap().clone())
    }

    fn cleanup(&mut self) -> Result<()> {
        *self.saved.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_cleanup() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("conversation.json");
        let mut persistence = FileConversationPersistence::new(path.clone());

        assert!(persistence.load()?.is_none());

        let turns = vec![
            ChatTurn::user("list files"),
            ChatTurn::assistant()
                .with_execution("shell", "ls")
                .with_output("src"),
        ];
        persistence.save(&turns)?;

        let loaded = persistence.load()?.unwrap();
        assert_eq!(loaded.turns, turns);
        assert!(loaded.saved_at.is_some());

        persistence.cleanup()?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("conversation.json");
        std::fs::write(&path, "{ not json")?;

        let err = FileConversationPersistence::new(path).load().unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
        Ok(())
    }
}
