//! The ordered message list for one mode, with the append/update
//! primitives every other component mutates it through.

use chrono::Utc;
use shared::chat::{AppMode, ChatMessage, ChatRole, GroundingSource, UploadedFile};
use uuid::Uuid;

use crate::prompts;

/// Options for [`Conversation::append`].
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    pub image_url: Option<String>,
    pub code: Option<String>,
    pub sources: Option<Vec<GroundingSource>>,
    pub is_loading: bool,
    pub id_override: Option<String>,
    pub uploaded_image: Option<UploadedFile>,
}

/// Options for [`Conversation::update`]. `image_url` and `code` always
/// overwrite (a `None` clears); `sources` only replace when given.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub image_url: Option<String>,
    pub code: Option<String>,
    pub sources: Option<Vec<GroundingSource>>,
    pub finished_loading: bool,
}

/// One mode's conversation: insertion order is display order. A fresh
/// conversation carries a single System welcome message.
#[derive(Debug, Clone)]
pub struct Conversation {
    mode: AppMode,
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(mode: AppMode) -> Self {
        Self {
            mode,
            messages: vec![welcome_message(mode)],
        }
    }

    /// Restore from persisted state. An empty list is reseeded.
    pub fn from_messages(mode: AppMode, messages: Vec<ChatMessage>) -> Self {
        if messages.is_empty() {
            return Self::new(mode);
        }
        Self { mode, messages }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
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

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// True while the untouched welcome seed is the only content. A
    /// pristine conversation is not worth persisting.
    pub fn is_pristine(&self) -> bool {
        self.messages.len() == 1
            && self.messages[0].id.starts_with("welcome-")
            && self.messages[0].text == prompts::welcome_text(self.mode)
    }

    /// Insert a new message at the end and return its id.
    ///
    /// Special case kept from the original contract: appending with an
    /// `id_override` that already exists while `is_loading` is requested
    /// concatenates `text` onto the existing message instead, so streaming
    /// delivered as repeated appends behaves exactly like explicit
    /// updates.
    pub fn append(&mut self, role: ChatRole, text: impl Into<String>, options: AppendOptions) -> String {
        let text = text.into();
        if options.is_loading {
            if let Some(id) = &options.id_override {
                if let Some(existing) = self.messages.iter_mut().find(|m| m.id == *id) {
                    existing.text.push_str(&text);
                    if options.sources.is_some() {
                        existing.sources = options.sources;
                    }
                    existing.touch();
                    return id.clone();
                }
            }
        }

        let id = options
            .id_override
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.messages.push(ChatMessage {
            id: id.clone(),
            role,
            text,
            timestamp: Utc::now().timestamp_millis(),
            image_url: options.image_url,
            code: options.code,
            sources: options.sources,
            is_loading: options.is_loading,
            uploaded_image: options.uploaded_image,
        });
        id
    }

    /// Replace the text, attachments, and loading flag of the message
    /// with `id`. A missing id is a silent no-op.
    pub fn update(&mut self, id: &str, text: impl Into<String>, options: UpdateOptions) {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            tracing::debug!(id, "update for unknown message id ignored");
            return;
        };
        message.text = text.into();
        message.image_url = options.image_url;
        message.code = options.code;
        if options.sources.is_some() {
            message.sources = options.sources;
        }
        message.is_loading = !options.finished_loading;
        message.touch();
    }

    /// Remove the message with `id`. Returns the removed message.
    pub fn remove(&mut self, id: &str) -> Option<ChatMessage> {
        let idx = self.index_of(id)?;
        Some(self.messages.remove(idx))
    }

    /// Drop everything and reseed the welcome message.
    pub fn clear(&mut self) {
        self.messages = vec![welcome_message(self.mode)];
    }
}

fn welcome_message(mode: AppMode) -> ChatMessage {
    let mut msg = ChatMessage::new(ChatRole::System, prompts::welcome_text(mode));
    msg.id = format!("welcome-{}-{}", mode.as_str(), msg.timestamp);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Conversation {
        Conversation::new(AppMode::LuaChat)
    }

    #[test]
    fn new_conversation_is_seeded_with_welcome() {
        let c = conv();
        assert_eq!(c.len(), 1);
        assert_eq!(c.messages()[0].role, ChatRole::System);
        assert!(c.messages()[0].id.starts_with("welcome-lua_chat-"));
        assert!(c.is_pristine());
    }

    #[test]
    fn append_assigns_fresh_unique_ids() {
        let mut c = conv();
        let a = c.append(ChatRole::User, "one", AppendOptions::default());
        let b = c.append(ChatRole::User, "two", AppendOptions::default());
        assert_ne!(a, b);
        assert_eq!(c.len(), 3);
        assert!(!c.is_pristine());
    }

    #[test]
    fn append_with_loading_override_concatenates() {
        let mut c = conv();
        let id = c.append(
            ChatRole::Ai,
            "Hi",
            AppendOptions {
                is_loading: true,
                ..Default::default()
            },
        );
        let again = c.append(
            ChatRole::Ai,
            " there",
            AppendOptions {
                is_loading: true,
                id_override: Some(id.clone()),
                ..Default::default()
            },
        );
        assert_eq!(again, id);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&id).unwrap().text, "Hi there");
        assert!(c.get(&id).unwrap().is_loading);
    }

    #[test]
    fn append_concatenation_replaces_sources_when_given() {
        let mut c = conv();
        let id = c.append(
            ChatRole::Ai,
            "",
            AppendOptions {
                is_loading: true,
                ..Default::default()
            },
        );
        c.append(
            ChatRole::Ai,
            "x",
            AppendOptions {
                is_loading: true,
                id_override: Some(id.clone()),
                sources: Some(vec![GroundingSource {
                    uri: Some("https://a".into()),
                    title: None,
                }]),
                ..Default::default()
            },
        );
        // No sources on the next fragment: previous value sticks.
        c.append(
            ChatRole::Ai,
            "y",
            AppendOptions {
                is_loading: true,
                id_override: Some(id.clone()),
                ..Default::default()
            },
        );
        let msg = c.get(&id).unwrap();
        assert_eq!(msg.text, "xy");
        assert_eq!(msg.sources.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn update_replaces_text_and_finalizes() {
        let mut c = conv();
        let id = c.append(
            ChatRole::Ai,
            "",
            AppendOptions {
                is_loading: true,
                ..Default::default()
            },
        );
        c.update(
            &id,
            "done",
            UpdateOptions {
                finished_loading: true,
                ..Default::default()
            },
        );
        let msg = c.get(&id).unwrap();
        assert_eq!(msg.text, "done");
        assert!(!msg.is_loading);
    }

    #[test]
    fn update_keeps_sources_unless_replaced() {
        let mut c = conv();
        let id = c.append(
            ChatRole::Ai,
            "",
            AppendOptions {
                is_loading: true,
                sources: Some(vec![GroundingSource {
                    uri: Some("https://a".into()),
                    title: Some("A".into()),
                }]),
                ..Default::default()
            },
        );
        c.update(&id, "t", UpdateOptions::default());
        assert!(c.get(&id).unwrap().sources.is_some());

        c.update(
            &id,
            "t",
            UpdateOptions {
                sources: Some(vec![]),
                ..Default::default()
            },
        );
        assert_eq!(c.get(&id).unwrap().sources.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn update_on_unknown_id_is_a_no_op() {
        let mut c = conv();
        c.append(ChatRole::User, "hello", AppendOptions::default());
        let before: Vec<(String, String)> = c
            .messages()
            .iter()
            .map(|m| (m.id.clone(), m.text.clone()))
            .collect();
        c.update(
            "no-such-id",
            "ignored",
            UpdateOptions {
                finished_loading: true,
                ..Default::default()
            },
        );
        let after: Vec<(String, String)> = c
            .messages()
            .iter()
            .map(|m| (m.id.clone(), m.text.clone()))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_and_clear() {
        let mut c = conv();
        let id = c.append(ChatRole::User, "bye", AppendOptions::default());
        assert!(c.remove(&id).is_some());
        assert!(c.remove(&id).is_none());
        c.append(ChatRole::User, "more", AppendOptions::default());
        c.clear();
        assert_eq!(c.len(), 1);
        assert!(c.is_pristine());
    }

    #[test]
    fn restoring_empty_state_reseeds() {
        let c = Conversation::from_messages(AppMode::GeneralChat, vec![]);
        assert!(c.is_pristine());
    }

    #[test]
    fn timestamp_refreshes_on_mutation() {
        let mut c = conv();
        let id = c.append(ChatRole::Ai, "a", AppendOptions::default());
        let before = c.get(&id).unwrap().timestamp;
        c.update(&id, "b", UpdateOptions::default());
        assert!(c.get(&id).unwrap().timestamp >= before);
    }
}
