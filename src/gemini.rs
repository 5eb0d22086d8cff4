use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GenError;
use crate::settings::{Settings, GEMINI_KEY_VAR};
use crate::TextGenerator;

static HTTP: Lazy<Client> = Lazy::new(Client::new);

/// One ordered piece of a generation request: plain text, or an inline
/// binary part (attached image or document) sent alongside it.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Inline { mime_type: String, data: Vec<u8> },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text(content.into())
    }

    pub fn inline(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Part::Inline {
            mime_type: mime_type.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireInline {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireInline>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct RequestBody {
    contents: Vec<WireContent>,
}

#[derive(Debug, Deserialize)]
struct RespPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RespContent {
    parts: Option<Vec<RespPart>>,
}

#[derive(Debug, Deserialize)]
struct RespCandidate {
    content: Option<RespContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    candidates: Option<Vec<RespCandidate>>,
}

fn to_wire(parts: &[Part]) -> RequestBody {
    let wire_parts = parts
        .iter()
        .map(|p| match p {
            Part::Text(t) => WirePart {
                text: Some(t.clone()),
                inline_data: None,
            },
            Part::Inline { mime_type, data } => WirePart {
                text: None,
                inline_data: Some(WireInline {
                    mime_type: mime_type.clone(),
                    data: B64.encode(data),
                }),
            },
        })
        .collect();
    RequestBody {
        contents: vec![WireContent { parts: wire_parts }],
    }
}

fn first_text(body: ResponseBody) -> Option<String> {
    for cand in body.candidates? {
        if let Some(content) = cand.content {
            if let Some(parts) = content.parts {
                for p in parts {
                    if let Some(t) = p.text {
                        if !t.is_empty() {
                            return Some(t);
                        }
                    }
                }
            }
        }
    }
    None
}

// Stream lines arrive as SSE-ish "data: {...}" or as elements of a JSON
// array split across chunks; tolerate both and skip what doesn't parse.
fn parse_stream_line(line: &str) -> Option<String> {
    let mut line = line.trim();
    if let Some(stripped) = line.strip_prefix("data: ") {
        line = stripped;
    }
    let line = line.trim_start_matches(['[', ',']).trim();
    if line.is_empty() || line == "]" {
        return None;
    }
    let body: ResponseBody = serde_json::from_str(line).ok()?;
    first_text(body)
}

pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            api_key: settings.gemini_api_key.clone(),
            model: settings.gemini_model().to_string(),
            base_url: settings.gemini_base_url().trim_end_matches('/').to_string(),
        }
    }

    fn api_key(&self) -> Result<&str, GenError> {
        self.api_key
            .as_deref()
            .ok_or(GenError::Config(GEMINI_KEY_VAR))
    }

    async fn generate_once(&self, parts: &[Part]) -> Result<String, GenError> {
        let api_key = self.api_key()?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, parts = parts.len(), "sending generate request");

        let resp = HTTP
            .post(&url)
            .header("X-goog-api-key", api_key)
            .json(&to_wire(parts))
            .send()
            .await
            .map_err(|e| GenError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GenError::Status {
                status: resp.status().as_u16(),
            });
        }

        let body: ResponseBody = resp
            .json()
            .await
            .map_err(|e| GenError::Parse(e.to_string()))?;

        first_text(body).ok_or(GenError::EmptyResponse)
    }

    async fn stream_inner(
        &self,
        parts: &[Part],
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, GenError> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url, self.model
        );
        debug!(model = %self.model, parts = parts.len(), "sending streaming generate request");

        let resp = HTTP
            .post(&url)
            .header("X-goog-api-key", api_key)
            .json(&to_wire(parts))
            .send()
            .await
            .map_err(|e| GenError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GenError::Status {
                status: resp.status().as_u16(),
            });
        }

        let mut full = String::new();
        let mut buf = String::new();
        let mut stream = resp.bytes_stream();

        while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| GenError::Transport(e.to_string()))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            let mut start = 0usize;
            for (i, ch) in buf.char_indices() {
                if ch == '\n' {
                    if let Some(text) = parse_stream_line(&buf[start..i]) {
                        full.push_str(&text);
                        on_chunk(&text);
                    }
                    start = i + 1;
                }
            }
            // Keep the unfinished tail
            if start > 0 {
                buf = buf[start..].to_string();
            }
        }

        if let Some(text) = parse_stream_line(&buf) {
            full.push_str(&text);
            on_chunk(&text);
        }

        if full.is_empty() {
            Err(GenError::EmptyResponse)
        } else {
            Ok(full)
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, parts: &[Part]) -> Result<String, GenError> {
        self.generate_once(parts).await
    }

    async fn generate_streaming(
        &self,
        parts: &[Part],
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, GenError> {
        match self.stream_inner(parts, on_chunk).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(error = %e, "streaming generation failed, falling back to single response");
                self.generate_once(parts).await
            }
        }
    }
}
