pub mod chat {
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Who authored a message. System messages are app-generated notices
    /// (welcome text, regeneration banners, upload confirmations) and are
    /// never sent to the model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ChatRole {
        User,
        Ai,
        System,
    }

    /// The four conversation contexts. Each mode has isolated persisted
    /// state and its own system prompt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AppMode {
        LuaChat,
        ImageGen,
        FileEditor,
        GeneralChat,
    }

    impl AppMode {
        pub fn as_str(&self) -> &'static str {
            match self {
                AppMode::LuaChat => "lua_chat",
                AppMode::ImageGen => "image_gen",
                AppMode::FileEditor => "file_editor",
                AppMode::GeneralChat => "general_chat",
            }
        }

        pub fn display_name(&self) -> &'static str {
            match self {
                AppMode::LuaChat => "Lua AI Chat",
                AppMode::ImageGen => "Image Generation Studio",
                AppMode::FileEditor => "AI File Editor",
                AppMode::GeneralChat => "General Chat",
            }
        }

        pub const ALL: [AppMode; 4] = [
            AppMode::LuaChat,
            AppMode::ImageGen,
            AppMode::FileEditor,
            AppMode::GeneralChat,
        ];
    }

    /// A file the user attached: UTF-8 text for text files, base64 for
    /// images (mirrors what the model API expects for inline data).
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UploadedFile {
        pub name: String,
        pub mime_type: String,
        pub content: String,
    }

    impl UploadedFile {
        pub fn is_image(&self) -> bool {
            self.mime_type.starts_with("image/")
        }
    }

    /// A web citation attached to a response when search grounding was
    /// used. Either field may be absent in the API payload.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GroundingSource {
        pub uri: Option<String>,
        pub title: Option<String>,
    }

    /// One entry in a conversation. `timestamp` is a last-modified marker
    /// in Unix millis, refreshed on every mutation.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub id: String,
        pub role: ChatRole,
        pub text: String,
        pub timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub sources: Option<Vec<GroundingSource>>,
        #[serde(default)]
        pub is_loading: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub uploaded_image: Option<UploadedFile>,
    }

    impl ChatMessage {
        pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
            Self {
                id: Uuid::new_v4().to_string(),
                role,
                text: text.into(),
                timestamp: Utc::now().timestamp_millis(),
                image_url: None,
                code: None,
                sources: None,
                is_loading: false,
                uploaded_image: None,
            }
        }

        /// Refresh the last-modified marker.
        pub fn touch(&mut self) {
            self.timestamp = Utc::now().timestamp_millis();
        }
    }
}

pub mod gateway_api {
    use serde::{Deserialize, Serialize};

    use crate::chat::{GroundingSource, UploadedFile};

    /// Conversational history is capped to this many turns before being
    /// sent to the model.
    pub const MAX_HISTORY_TURNS: usize = 10;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum HistoryRole {
        User,
        Model,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum HistoryPart {
        Text(String),
        InlineImage { mime_type: String, data: String },
    }

    /// One prior conversational turn, in the model API's history shape.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HistoryItem {
        pub role: HistoryRole,
        pub parts: Vec<HistoryPart>,
    }

    /// A text-generation request, streaming or not.
    #[derive(Debug, Clone, Default)]
    pub struct TextRequest {
        pub prompt: String,
        pub system_instruction: Option<String>,
        pub image: Option<UploadedFile>,
        pub history: Vec<HistoryItem>,
        pub use_search: bool,
    }

    /// Non-streaming generation result.
    #[derive(Debug, Clone)]
    pub struct TextResponse {
        pub text: String,
        pub sources: Option<Vec<GroundingSource>>,
    }

    /// One unit of a streamed response, sent over an mpsc channel from
    /// the provider to the reconciler.
    ///
    /// A `Delta` may carry empty text alongside sources; providers
    /// validate the wire payload so nothing looser than this enum crosses
    /// the boundary. After `Done` or `Error` the sender stops.
    #[derive(Debug, Clone, PartialEq)]
    pub enum StreamChunk {
        Delta {
            text: String,
            sources: Option<Vec<GroundingSource>>,
        },
        Done,
        Error(String),
    }
}
