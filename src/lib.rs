//! Conversation store and request-orchestration core for the Sophos
//! assistant. The presentation surface feeds [`UiEvent`]s into a
//! [`Session`] and receives [`Render`] instructions back; everything that
//! actually generates content lives behind the [`TextGenerator`] and
//! [`ImageGenerator`] seams.

pub mod chat;
pub mod classify;
pub mod error;
pub mod gemini;
pub mod pollinations;
pub mod settings;
pub mod store;
pub mod utils;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;

pub use crate::chat::{Attachment, Render, TurnStage};
pub use crate::error::{ConfigError, GenError, ImageGenError, StoreError};
pub use crate::gemini::{GeminiClient, Part};
pub use crate::pollinations::PollinationsClient;
pub use crate::settings::{load_settings_from_dir, save_settings_to_dir, Settings};
pub use crate::store::{ChatStore, Conversation, Message, Payload, Role};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, parts: &[Part]) -> Result<String, GenError>;

    /// Streaming variant used for live progress; the default simply
    /// delegates to [`TextGenerator::generate`] with no intermediate
    /// chunks.
    async fn generate_streaming(
        &self,
        parts: &[Part],
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, GenError> {
        let _ = on_chunk;
        self.generate(parts).await
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn fetch_image(&self, prompt: &str) -> Result<Vec<u8>, ImageGenError>;
}

/// Presentation events the core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    NewConversation,
    SelectConversation {
        id: String,
    },
    ClearAll,
    Submit {
        text: String,
        attachment: Option<Attachment>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppHealth {
    pub ok: bool,
    pub data_dir: String,
    pub text_model: String,
    pub image_model: String,
    pub text_key_configured: bool,
    pub image_key_configured: bool,
}

/// Per-session state: the conversation store, the settings snapshot and
/// the two generation clients. Constructed once and passed by reference;
/// there is no ambient global state.
pub struct Session {
    store: ChatStore,
    settings: Settings,
    data_dir: PathBuf,
    text_client: Arc<dyn TextGenerator>,
    image_client: Arc<dyn ImageGenerator>,
    _log_guard: Option<WorkerGuard>,
}

impl Session {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        settings: Settings,
        text_client: Arc<dyn TextGenerator>,
        image_client: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            store: ChatStore::new(),
            settings,
            data_dir: data_dir.into(),
            text_client,
            image_client,
            _log_guard: None,
        }
    }

    /// Wires the real clients: resolves the data dir, starts logging,
    /// loads settings and reports missing credentials. Missing keys do
    /// not abort startup; they disable generation until configured while
    /// store and UI events keep working.
    pub fn startup() -> Result<Session> {
        let data_dir = utils::ensure_data_dir()?;
        let guard = utils::init_tracing(&data_dir)?;
        let settings = load_settings_from_dir(&data_dir);
        for missing in settings.missing_keys() {
            warn!(%missing, "credential missing, generation disabled until configured");
        }
        let text_client = Arc::new(GeminiClient::new(&settings));
        let image_client = Arc::new(PollinationsClient::new(&settings)?);
        let mut session = Session::new(data_dir, settings, text_client, image_client);
        session._log_guard = Some(guard);
        Ok(session)
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn health(&self) -> AppHealth {
        let missing = self.settings.missing_keys();
        AppHealth {
            ok: missing.is_empty(),
            data_dir: self.data_dir.display().to_string(),
            text_model: self.settings.gemini_model().to_string(),
            image_model: self.settings.image_model().to_string(),
            text_key_configured: self.settings.gemini_api_key.is_some(),
            image_key_configured: self.settings.pollinations_api_key.is_some(),
        }
    }

    /// One pass of the event loop: mutate state, then emit instructions.
    /// Transient turn stages flow through `on_stage`; the returned batch
    /// always ends with a fresh message list for the active conversation,
    /// lazily created when none exists yet.
    pub async fn handle_event(
        &self,
        event: UiEvent,
        on_stage: &mut (dyn FnMut(TurnStage) + Send),
    ) -> Vec<Render> {
        let mut out = Vec::new();
        match event {
            UiEvent::NewConversation => {
                self.store.create_conversation();
            }
            UiEvent::SelectConversation { id } => {
                if let Err(e) = self.store.set_active(&id) {
                    out.push(Render::ErrorBanner {
                        text: e.to_string(),
                    });
                }
            }
            UiEvent::ClearAll => {
                self.store.clear_all();
            }
            UiEvent::Submit { text, attachment } => {
                let id = self.store.active_or_create();
                match chat::run_turn(
                    &self.store,
                    &id,
                    &text,
                    attachment,
                    self.text_client.as_ref(),
                    self.image_client.as_ref(),
                    on_stage,
                )
                .await
                {
                    Ok(mut renders) => out.append(&mut renders),
                    Err(e) => out.push(Render::ErrorBanner {
                        text: e.to_string(),
                    }),
                }
            }
        }

        let active = self.store.active_or_create();
        let messages = self.store.messages(&active).unwrap_or_default();
        out.push(Render::MessageList {
            conversation_id: active,
            messages,
        });
        out
    }

    /// Writes a generated image message to `<data_dir>/images/` as a
    /// presentation convenience; conversations themselves stay in memory.
    pub async fn save_image(&self, conversation_id: &str, message_id: &str) -> Result<PathBuf> {
        let messages = self.store.messages(conversation_id)?;
        let message = messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| anyhow::anyhow!("message not found: {message_id}"))?;
        match &message.payload {
            Payload::Image(bytes) => {
                chat::save_image_to_disk(&self.data_dir, conversation_id, message_id, bytes).await
            }
            Payload::Text(_) => Err(anyhow::anyhow!("message {message_id} is not an image")),
        }
    }
}
