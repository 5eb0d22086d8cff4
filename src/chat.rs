use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::classify::{classify, TurnKind};
use crate::error::{GenError, ImageGenError, StoreError};
use crate::gemini::Part;
use crate::store::{ChatStore, Message, Payload, Role};
use crate::{ImageGenerator, TextGenerator};

/// Stages of one turn, reported through the orchestrator's stage callback
/// so the presentation surface can show a transient indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TurnStage {
    AnalyzingAttachment,
    Classifying,
    RefiningPrompt,
    GeneratingImage,
    GeneratingText,
    StreamingText { partial: String },
    Done,
    Failed { error: String },
}

/// A single file supplied with one user turn. Forwarded to the text
/// service for that call only, never stored as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Instructions the core emits for the presentation surface to act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Render {
    MessageList {
        conversation_id: String,
        messages: Vec<Message>,
    },
    ErrorBanner {
        text: String,
    },
    Image {
        message_id: String,
        bytes: Vec<u8>,
    },
}

const REFINEMENT_HISTORY_LIMIT: usize = 4;

fn recent_text_history(messages: &[Message], limit: usize) -> String {
    let mut lines: Vec<String> = messages
        .iter()
        .rev()
        .filter_map(|m| match &m.payload {
            Payload::Text(t) => {
                let who = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                Some(format!("{who}: {t}"))
            }
            Payload::Image(_) => None,
        })
        .take(limit)
        .collect();
    lines.reverse();
    lines.join("\n")
}

fn build_refinement_prompt(user_text: &str, history: &[Message]) -> String {
    let recent = recent_text_history(history, REFINEMENT_HISTORY_LIMIT);
    let context_block = if recent.is_empty() {
        String::new()
    } else {
        format!("\nRecent conversation, for visual consistency:\n{recent}\n")
    };
    format!(
        r#"You are a prompt writer for a text-to-image model.
Rewrite the request below as one detailed English prompt. Describe the
subject, the artistic style, the lighting and the resolution (for
example "8k, highly detailed"). Answer with the prompt text only, no
preamble and no quotes.
{context_block}
Request: {user_text}"#
    )
}

/// Best-effort rewrite of a casual image request into a detailed English
/// prompt. Any failure falls back to the raw request; the user never sees
/// a refinement error.
pub async fn refine_image_prompt(
    text_client: &dyn TextGenerator,
    user_text: &str,
    history: &[Message],
) -> String {
    let prompt = build_refinement_prompt(user_text, history);
    match text_client.generate(&[Part::text(prompt)]).await {
        Ok(refined) if !refined.trim().is_empty() => refined.trim().to_string(),
        Ok(_) => user_text.to_string(),
        Err(e) => {
            warn!(error = %e, "prompt refinement failed, using the raw request");
            user_text.to_string()
        }
    }
}

pub fn text_error_banner(err: &GenError) -> String {
    match err {
        GenError::Config(key) => {
            format!("Text generation is not configured. Set {key} and restart.")
        }
        GenError::Status { status } => {
            format!("Sophos text service error (HTTP {status}). Try again.")
        }
        GenError::Parse(_) => "The text service sent an unreadable response. Try again.".to_string(),
        GenError::EmptyResponse => {
            "The text service returned no content. Try rephrasing.".to_string()
        }
        GenError::Transport(e) => format!("Could not reach the text service: {e}"),
    }
}

pub fn image_error_banner(err: &ImageGenError) -> String {
    match err {
        ImageGenError::Config(key) => {
            format!("Image generation is not configured. Set {key} and restart.")
        }
        ImageGenError::Authentication(status) => format!(
            "The image service rejected the credential (HTTP {status}). Check the Pollinations key."
        ),
        ImageGenError::RateLimited => {
            "Image servers are rate limited right now. Wait a moment and retry.".to_string()
        }
        ImageGenError::Timeout => {
            "The image request timed out. The queue is likely full, retry shortly.".to_string()
        }
        ImageGenError::Service { status } => {
            format!("Image service error (HTTP {status}). Try a simpler prompt.")
        }
        ImageGenError::UnexpectedContent { content_type } => {
            format!("The image service returned {content_type} instead of an image.")
        }
        ImageGenError::Transport(e) => format!("Could not reach the image service: {e}"),
    }
}

/// One synchronous pass for one user submission: record the turn, run the
/// attachment branch if present, classify, then generate. The attachment
/// branch and the image branch are independent and can both fire for the
/// same turn.
pub async fn run_turn(
    store: &ChatStore,
    conversation_id: &str,
    user_text: &str,
    attachment: Option<Attachment>,
    text_client: &dyn TextGenerator,
    image_client: &dyn ImageGenerator,
    on_stage: &mut (dyn FnMut(TurnStage) + Send),
) -> Result<Vec<Render>, StoreError> {
    let mut out = Vec::new();

    let prior_history = store.messages(conversation_id)?;

    // The user's own turn is recorded before any external call can fail.
    store.append(conversation_id, Message::user_text(user_text))?;

    if let Some(att) = attachment {
        on_stage(TurnStage::AnalyzingAttachment);
        info!(name = %att.name, mime = %att.mime_type, "analyzing attachment");
        let parts = [Part::text(user_text), Part::inline(att.mime_type, att.bytes)];
        match text_client.generate(&parts).await {
            Ok(reply) => store.append(conversation_id, Message::assistant_text(reply))?,
            Err(e) => {
                warn!(error = %e, "attachment analysis failed");
                on_stage(TurnStage::Failed {
                    error: e.to_string(),
                });
                out.push(Render::ErrorBanner {
                    text: text_error_banner(&e),
                });
            }
        }
    }

    on_stage(TurnStage::Classifying);
    match classify(user_text) {
        TurnKind::ImageRequest => {
            on_stage(TurnStage::RefiningPrompt);
            let prompt = refine_image_prompt(text_client, user_text, &prior_history).await;
            on_stage(TurnStage::GeneratingImage);
            match image_client.fetch_image(&prompt).await {
                Ok(bytes) => {
                    let message = Message::assistant_image(bytes.clone());
                    let message_id = message.id.clone();
                    store.append(conversation_id, message)?;
                    out.push(Render::Image { message_id, bytes });
                }
                Err(e) => {
                    warn!(error = %e, "image generation failed");
                    on_stage(TurnStage::Failed {
                        error: e.to_string(),
                    });
                    out.push(Render::ErrorBanner {
                        text: image_error_banner(&e),
                    });
                }
            }
        }
        TurnKind::TextRequest => {
            on_stage(TurnStage::GeneratingText);
            let parts = [Part::text(user_text)];
            let mut partial = String::new();
            let result = text_client
                .generate_streaming(&parts, &mut |chunk| {
                    partial.push_str(chunk);
                    on_stage(TurnStage::StreamingText {
                        partial: partial.clone(),
                    });
                })
                .await;
            match result {
                Ok(reply) => store.append(conversation_id, Message::assistant_text(reply))?,
                Err(e) => {
                    warn!(error = %e, "text generation failed");
                    on_stage(TurnStage::Failed {
                        error: e.to_string(),
                    });
                    out.push(Render::ErrorBanner {
                        text: text_error_banner(&e),
                    });
                }
            }
        }
    }

    // Turn complete either way; the loop is ready for the next submission.
    on_stage(TurnStage::Done);
    Ok(out)
}

pub fn guess_image_extension(bytes: &[u8]) -> &'static str {
    // PNG
    if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return "png";
    }
    // JPEG
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        return "jpg";
    }
    // WEBP (RIFF....WEBP)
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "webp";
    }
    "png"
}

fn sanitize_for_path(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

pub async fn save_image_to_disk(
    data_dir: &Path,
    conversation_id: &str,
    message_id: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let dir = data_dir
        .join("images")
        .join(sanitize_for_path(conversation_id));
    tokio::fs::create_dir_all(&dir)
        .await
        .context("create images dir")?;
    let ext = guess_image_extension(bytes);
    let path = dir.join(format!("{message_id}.{ext}"));
    tokio::fs::write(&path, bytes).await.context("write image")?;
    info!(path = %path.display(), "saved generated image");
    Ok(path)
}
