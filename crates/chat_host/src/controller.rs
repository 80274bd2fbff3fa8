//! The conversation controller: owns per-mode state, dispatches user
//! input to the gateway, and applies the streaming/regeneration/editor
//! flows to the message list.

use std::sync::LazyLock;

use regex::Regex;
use shared::chat::{AppMode, ChatMessage, ChatRole, UploadedFile};
use shared::gateway_api::{
    HistoryItem, HistoryPart, HistoryRole, StreamChunk, TextRequest, MAX_HISTORY_TURNS,
};
use tokio::sync::mpsc;

use crate::conversation::{AppendOptions, Conversation, UpdateOptions};
use crate::gateway::ModelGateway;
use crate::ingest;
use crate::persistence::MessageStore;
use crate::prompts;
use crate::reconciler::{self, ModeEpoch, StreamOutcome, WriteObserver};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Could not find the original user prompt to regenerate.")]
    NoPromptToRegenerate,

    #[error("No file loaded to modify, and no contextual image provided.")]
    NoFileLoaded,

    #[error("Invalid file type. Please upload a .txt or .lua file.")]
    InvalidFileType { name: String },
}

/// Raw file-editor state, kept outside the message list.
#[derive(Debug, Clone, Default)]
pub struct FileEditorState {
    pub content: String,
    pub name: Option<String>,
}

/// Last generated image, for the image-mode display slot.
#[derive(Debug, Clone, Default)]
pub struct ImageState {
    pub url: Option<String>,
    pub prompt: String,
}

pub struct ChatController<G> {
    gateway: G,
    store: MessageStore,
    mode: AppMode,
    conversation: Conversation,
    file_editor: FileEditorState,
    image: ImageState,
    epoch: ModeEpoch,
}

/// Persists the conversation after every reconciler write, so streamed
/// state survives a crash mid-response.
struct PersistObserver<'a> {
    store: &'a MessageStore,
    mode: AppMode,
}

impl WriteObserver for PersistObserver<'_> {
    fn message_updated(&mut self, conversation: &Conversation) {
        self.store.save_messages(self.mode, conversation.messages());
    }
}

impl<G: ModelGateway> ChatController<G> {
    pub fn new(gateway: G, store: MessageStore) -> Self {
        let mut controller = Self {
            gateway,
            store,
            mode: AppMode::LuaChat,
            conversation: Conversation::new(AppMode::LuaChat),
            file_editor: FileEditorState::default(),
            image: ImageState::default(),
            epoch: ModeEpoch::new(),
        };
        controller.load_mode_state();
        controller
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.conversation.messages()
    }

    pub fn file_editor(&self) -> &FileEditorState {
        &self.file_editor
    }

    pub fn image(&self) -> &ImageState {
        &self.image
    }

    /// True while a response is in flight. Input is expected to stay
    /// disabled until this clears; the controller does not arbitrate
    /// concurrent sends.
    pub fn is_busy(&self) -> bool {
        self.conversation.messages().iter().any(|m| m.is_loading)
    }

    /// Switch the active mode. In-flight streams for the previous mode
    /// go stale and stop writing.
    pub fn set_mode(&mut self, mode: AppMode) {
        if mode == self.mode {
            return;
        }
        self.epoch.bump();
        self.mode = mode;
        self.load_mode_state();
    }

    fn load_mode_state(&mut self) {
        let mut messages = self.store.load_messages(self.mode).unwrap_or_default();
        // A message persisted mid-stream has no stream to finish it.
        for msg in &mut messages {
            msg.is_loading = false;
        }
        self.conversation = Conversation::from_messages(self.mode, messages);

        self.file_editor = FileEditorState::default();
        if self.mode == AppMode::FileEditor {
            let (content, name) = self.store.load_editor(self.mode);
            self.file_editor.content = content.unwrap_or_default();
            self.file_editor.name = name;
        }
        self.image = ImageState::default();
    }

    fn persist(&self) {
        if self.conversation.is_pristine() {
            return;
        }
        self.store.save_messages(self.mode, self.conversation.messages());
    }

    /// Handle one user submission: append the user message and dispatch
    /// per the active mode. Empty input with no attachment is ignored.
    pub async fn send(
        &mut self,
        input: &str,
        image: Option<UploadedFile>,
    ) -> Result<(), ChatError> {
        if input.trim().is_empty() && image.is_none() {
            return Ok(());
        }

        // History covers everything before this turn; the prompt itself
        // travels separately in the request.
        let history = build_history(self.conversation.messages(), &[]);

        let user_text = match &image {
            Some(img) if input.trim().is_empty() => format!("(Analyzing image: {})", img.name),
            _ => input.to_string(),
        };
        self.conversation.append(
            ChatRole::User,
            user_text,
            AppendOptions {
                uploaded_image: image.clone(),
                ..Default::default()
            },
        );
        self.persist();

        self.dispatch(input, image, history).await
    }

    /// Regenerate the AI message `ai_id`. The direct predecessor must be
    /// the user prompt; otherwise nothing is mutated and no call is made.
    pub async fn regenerate(&mut self, ai_id: &str) -> Result<(), ChatError> {
        let idx = self
            .conversation
            .index_of(ai_id)
            .filter(|&i| i > 0)
            .ok_or(ChatError::NoPromptToRegenerate)?;
        let predecessor = &self.conversation.messages()[idx - 1];
        if predecessor.role != ChatRole::User {
            return Err(ChatError::NoPromptToRegenerate);
        }
        let prompt = predecessor.text.clone();
        let image = predecessor.uploaded_image.clone();

        // History stops strictly before the user prompt being retried.
        let history = build_history(&self.conversation.messages()[..idx - 1], &[]);

        self.conversation.remove(ai_id);
        let notice = format!("Regenerating response for: \"{}\"", preview(&prompt, 50));
        self.conversation
            .append(ChatRole::System, notice, AppendOptions::default());
        self.persist();

        self.dispatch(&prompt, image, history).await
    }

    async fn dispatch(
        &mut self,
        input: &str,
        image: Option<UploadedFile>,
        history: Vec<HistoryItem>,
    ) -> Result<(), ChatError> {
        let placeholder_id = self.conversation.append(
            ChatRole::Ai,
            "",
            AppendOptions {
                is_loading: true,
                ..Default::default()
            },
        );
        self.persist();

        match self.mode {
            AppMode::LuaChat | AppMode::GeneralChat => {
                self.stream_chat(input, image, history, &placeholder_id).await
            }
            AppMode::ImageGen => self.generate_image(input, &placeholder_id).await,
            AppMode::FileEditor => {
                self.edit_file(input, image, history, &placeholder_id).await
            }
        }
    }

    async fn stream_chat(
        &mut self,
        input: &str,
        image: Option<UploadedFile>,
        history: Vec<HistoryItem>,
        placeholder_id: &str,
    ) -> Result<(), ChatError> {
        let (system_instruction, use_search) = match self.mode {
            AppMode::GeneralChat => (prompts::GENERAL_CHAT_SYSTEM_PROMPT, true),
            _ => (prompts::LUA_SYSTEM_PROMPT, false),
        };
        let request = TextRequest {
            prompt: input.to_string(),
            system_instruction: Some(system_instruction.to_string()),
            image,
            history,
            use_search,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ticket = self.epoch.ticket();
        let mut observer = PersistObserver {
            store: &self.store,
            mode: self.mode,
        };

        let gateway = &self.gateway;
        let conversation = &mut self.conversation;
        let err_tx = tx.clone();
        let stream = async move {
            // Connection-phase failures become an error chunk so the
            // reconciler owns the single terminal transition.
            if let Err(e) = gateway.stream_text(request, tx).await {
                let _ = err_tx.send(StreamChunk::Error(format!("{:#}", e)));
            }
        };
        let reconcile = reconciler::reconcile(
            conversation,
            placeholder_id,
            &mut rx,
            &ticket,
            &mut observer,
        );
        let ((), outcome) = futures::join!(stream, reconcile);

        match outcome {
            StreamOutcome::Completed => {}
            StreamOutcome::Failed(e) => {
                tracing::warn!(mode = self.mode.as_str(), error = %e, "stream failed");
            }
            StreamOutcome::Cancelled => {
                tracing::info!(mode = self.mode.as_str(), "stream superseded by mode switch");
            }
        }
        Ok(())
    }

    async fn generate_image(
        &mut self,
        input: &str,
        placeholder_id: &str,
    ) -> Result<(), ChatError> {
        self.image.prompt = input.to_string();
        let ticket = self.epoch.ticket();
        let result = self
            .gateway
            .generate_image(&format!("{}{}", prompts::IMAGE_PROMPT_PREFIX, input))
            .await;
        if !ticket.is_live() {
            return Ok(());
        }

        match result {
            Ok(url) => {
                self.image.url = Some(url.clone());
                self.conversation.update(
                    placeholder_id,
                    format!("Here's an image for: \"{}\"", input),
                    UpdateOptions {
                        image_url: Some(url),
                        finished_loading: true,
                        ..Default::default()
                    },
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed");
                self.conversation.update(
                    placeholder_id,
                    format!("Failed to generate image. {:#}", e),
                    UpdateOptions {
                        finished_loading: true,
                        ..Default::default()
                    },
                );
            }
        }
        self.persist();
        Ok(())
    }

    async fn edit_file(
        &mut self,
        input: &str,
        image: Option<UploadedFile>,
        history: Vec<HistoryItem>,
        placeholder_id: &str,
    ) -> Result<(), ChatError> {
        if self.file_editor.content.is_empty() && image.is_none() {
            self.conversation.update(
                placeholder_id,
                "Please upload a file first or provide context for modifications.",
                UpdateOptions {
                    finished_loading: true,
                    ..Default::default()
                },
            );
            self.persist();
            return Err(ChatError::NoFileLoaded);
        }

        let file_name = self.file_editor.name.as_deref().unwrap_or("untitled");
        let code_context = if self.file_editor.content.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nOriginal Code ({}):\n```\n{}\n```\n",
                file_name, self.file_editor.content
            )
        };
        let request = TextRequest {
            prompt: format!(
                "{}\nUser Request: {}\n\nModified Code (output only the raw modified code block):",
                code_context, input
            ),
            system_instruction: Some(prompts::FILE_EDITOR_SYSTEM_PROMPT.to_string()),
            image,
            history,
            use_search: false,
        };

        let ticket = self.epoch.ticket();
        let result = self.gateway.generate_text(request).await;
        if !ticket.is_live() {
            return Ok(());
        }

        match result {
            Ok(response) => {
                let code = strip_code_fences(&response.text);
                self.file_editor.content = code.clone();
                self.store.save_editor(
                    self.mode,
                    Some(&self.file_editor.content),
                    self.file_editor.name.as_deref(),
                );
                let summary = format!(
                    "Code updated for \"{}\" based on your instruction: \"{}\"",
                    self.file_editor.name.as_deref().unwrap_or("file"),
                    input
                );
                self.conversation.update(
                    placeholder_id,
                    summary,
                    UpdateOptions {
                        code: Some(code),
                        sources: response.sources,
                        finished_loading: true,
                        ..Default::default()
                    },
                );
            }
            Err(e) => {
                self.conversation.update(
                    placeholder_id,
                    format!("[ERROR: {:#}]", e),
                    UpdateOptions {
                        finished_loading: true,
                        ..Default::default()
                    },
                );
            }
        }
        self.persist();
        Ok(())
    }

    /// Load an uploaded file into the editor (FileEditor mode). Rejected
    /// types leave no partial state behind.
    pub fn upload_file(&mut self, file: UploadedFile) -> Result<(), ChatError> {
        if !ingest::editor_acceptable(&file) {
            self.conversation.append(
                ChatRole::System,
                format!(
                    "Failed to load \"{}\". Please upload a .txt or .lua file.",
                    file.name
                ),
                AppendOptions::default(),
            );
            self.persist();
            return Err(ChatError::InvalidFileType { name: file.name });
        }

        self.file_editor.content = file.content;
        self.file_editor.name = Some(file.name.clone());
        self.store.save_editor(
            self.mode,
            Some(&self.file_editor.content),
            self.file_editor.name.as_deref(),
        );
        self.conversation.append(
            ChatRole::System,
            format!(
                "File \"{}\" loaded and displayed above. Instruct lua.ia below on how to modify it.",
                file.name
            ),
            AppendOptions::default(),
        );
        self.persist();
        Ok(())
    }

    /// Reset the active mode to a fresh welcome message and delete its
    /// persisted state.
    pub fn clear(&mut self) {
        self.epoch.bump();
        self.conversation.clear();
        self.store.delete_messages(self.mode);
        match self.mode {
            AppMode::ImageGen => self.image = ImageState::default(),
            AppMode::FileEditor => {
                self.file_editor = FileEditorState::default();
                self.store.delete_editor(self.mode);
            }
            _ => {}
        }
    }
}

/// Map messages onto the gateway history shape: System entries are
/// dropped, ids in `exclude` are dropped, and the result is capped to the
/// most recent [`MAX_HISTORY_TURNS`] turns. A user message with an
/// attached image contributes the image part before its text.
pub fn build_history(messages: &[ChatMessage], exclude: &[&str]) -> Vec<HistoryItem> {
    let mut items: Vec<HistoryItem> = messages
        .iter()
        .filter(|m| m.role != ChatRole::System && !exclude.contains(&m.id.as_str()))
        .map(|m| {
            let mut parts = Vec::new();
            if m.role == ChatRole::User {
                if let Some(img) = &m.uploaded_image {
                    if img.is_image() {
                        parts.push(HistoryPart::InlineImage {
                            mime_type: img.mime_type.clone(),
                            data: img.content.clone(),
                        });
                    }
                }
            }
            parts.push(HistoryPart::Text(m.text.clone()));
            HistoryItem {
                role: if m.role == ChatRole::User {
                    HistoryRole::User
                } else {
                    HistoryRole::Model
                },
                parts,
            }
        })
        .collect();
    if items.len() > MAX_HISTORY_TURNS {
        items.drain(..items.len() - MAX_HISTORY_TURNS);
    }
    items
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[\w \t-]*\r?\n?|\n?```\s*$").expect("fence regex"));

/// Strip a surrounding Markdown code fence (with optional language tag)
/// from a model reply.
fn strip_code_fences(text: &str) -> String {
    FENCE_RE.replace_all(text.trim(), "").trim().to_string()
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
