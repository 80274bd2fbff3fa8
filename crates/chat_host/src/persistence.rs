//! Best-effort key-value persistence: one JSON file per mode for the
//! message list, plus separate files for the file editor's raw content
//! and filename. Write failures are logged, never fatal; corrupt state
//! is discarded, not repaired.

use std::fs;
use std::path::PathBuf;

use shared::chat::{AppMode, ChatMessage};

pub struct MessageStore {
    base: PathBuf,
}

impl MessageStore {
    /// Store under the platform data directory.
    pub fn open() -> Self {
        let base = directories::ProjectDirs::from("com.local", "lua.ia", "LuaIa")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./lua-ia-data"));
        Self { base }
    }

    /// Store under an explicit directory (tests).
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn messages_path(&self, mode: AppMode) -> PathBuf {
        self.base.join(format!("messages-{}.json", mode.as_str()))
    }

    fn editor_content_path(&self, mode: AppMode) -> PathBuf {
        self.base.join(format!("file-content-{}", mode.as_str()))
    }

    fn editor_name_path(&self, mode: AppMode) -> PathBuf {
        self.base.join(format!("file-name-{}", mode.as_str()))
    }

    /// Load a mode's persisted message list. Missing or corrupt state
    /// yields `None` so the caller reseeds a fresh conversation.
    pub fn load_messages(&self, mode: AppMode) -> Option<Vec<ChatMessage>> {
        let path = self.messages_path(mode);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(messages) => Some(messages),
            Err(e) => {
                tracing::warn!(mode = mode.as_str(), %e, "discarding corrupt message state");
                None
            }
        }
    }

    pub fn save_messages(&self, mode: AppMode, messages: &[ChatMessage]) {
        let path = self.messages_path(mode);
        if let Err(e) = fs::create_dir_all(&self.base) {
            tracing::warn!(%e, "failed to create data dir");
            return;
        }
        match serde_json::to_string(messages) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    tracing::warn!(mode = mode.as_str(), %e, "failed to persist messages");
                }
            }
            Err(e) => tracing::warn!(%e, "failed to serialize messages"),
        }
    }

    pub fn delete_messages(&self, mode: AppMode) {
        let _ = fs::remove_file(self.messages_path(mode));
    }

    /// Raw editor state stored outside the message list.
    pub fn load_editor(&self, mode: AppMode) -> (Option<String>, Option<String>) {
        let content = fs::read_to_string(self.editor_content_path(mode)).ok();
        let name = fs::read_to_string(self.editor_name_path(mode)).ok();
        (content, name)
    }

    pub fn save_editor(&self, mode: AppMode, content: Option<&str>, name: Option<&str>) {
        if let Err(e) = fs::create_dir_all(&self.base) {
            tracing::warn!(%e, "failed to create data dir");
            return;
        }
        match content {
            Some(content) => {
                if let Err(e) = fs::write(self.editor_content_path(mode), content) {
                    tracing::warn!(%e, "failed to persist editor content");
                }
            }
            None => {
                let _ = fs::remove_file(self.editor_content_path(mode));
            }
        }
        match name {
            Some(name) => {
                if let Err(e) = fs::write(self.editor_name_path(mode), name) {
                    tracing::warn!(%e, "failed to persist editor filename");
                }
            }
            None => {
                let _ = fs::remove_file(self.editor_name_path(mode));
            }
        }
    }

    pub fn delete_editor(&self, mode: AppMode) {
        let _ = fs::remove_file(self.editor_content_path(mode));
        let _ = fs::remove_file(self.editor_name_path(mode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::chat::{ChatMessage, ChatRole};

    #[test]
    fn messages_round_trip_per_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::with_base(dir.path());

        let messages = vec![
            ChatMessage::new(ChatRole::System, "welcome"),
            ChatMessage::new(ChatRole::User, "hello"),
        ];
        store.save_messages(AppMode::LuaChat, &messages);

        let loaded = store.load_messages(AppMode::LuaChat).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].text, "hello");

        // Other modes are isolated.
        assert!(store.load_messages(AppMode::GeneralChat).is_none());
    }

    #[test]
    fn corrupt_state_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::with_base(dir.path());
        std::fs::write(
            dir.path().join("messages-lua_chat.json"),
            "{not valid json",
        )
        .unwrap();
        assert!(store.load_messages(AppMode::LuaChat).is_none());
    }

    #[test]
    fn delete_removes_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::with_base(dir.path());
        store.save_messages(AppMode::ImageGen, &[ChatMessage::new(ChatRole::User, "x")]);
        store.delete_messages(AppMode::ImageGen);
        assert!(store.load_messages(AppMode::ImageGen).is_none());
    }

    #[test]
    fn editor_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::with_base(dir.path());

        store.save_editor(AppMode::FileEditor, Some("print(1)"), Some("main.lua"));
        let (content, name) = store.load_editor(AppMode::FileEditor);
        assert_eq!(content.as_deref(), Some("print(1)"));
        assert_eq!(name.as_deref(), Some("main.lua"));

        store.save_editor(AppMode::FileEditor, None, None);
        let (content, name) = store.load_editor(AppMode::FileEditor);
        assert!(content.is_none());
        assert!(name.is_none());
    }
}
