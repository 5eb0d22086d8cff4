use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::classify::sanitize_image_prompt;
use crate::error::ImageGenError;
use crate::settings::{Settings, POLLINATIONS_KEY_VAR};
use crate::ImageGenerator;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PollinationsClient {
    http: Client,
    api_key: Option<String>,
    base: Url,
    model: String,
    width: u32,
    height: u32,
}

impl PollinationsClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build image http client")?;
        let base = Url::parse(settings.image_base_url()).context("image base url")?;
        Ok(Self {
            http,
            api_key: settings.pollinations_api_key.clone(),
            base,
            model: settings.image_model().to_string(),
            width: settings.image_width(),
            height: settings.image_height(),
        })
    }

    // The prompt travels as a single percent-encoded path segment; a fresh
    // seed per request keeps repeated prompts from returning a cached image.
    fn build_url(&self, prompt: &str, seed: u32) -> Result<Url, ImageGenError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ImageGenError::Transport("image endpoint URL cannot hold a path".into()))?
            .pop_if_empty()
            .push("prompt")
            .push(prompt);
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("width", &self.width.to_string())
            .append_pair("height", &self.height.to_string())
            .append_pair("nologo", "true")
            .append_pair("seed", &seed.to_string());
        Ok(url)
    }
}

fn status_error(status: StatusCode) -> ImageGenError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        ImageGenError::Authentication(status.as_u16())
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ImageGenError::RateLimited
    } else {
        ImageGenError::Service {
            status: status.as_u16(),
        }
    }
}

fn transport_error(e: reqwest::Error) -> ImageGenError {
    if e.is_timeout() {
        ImageGenError::Timeout
    } else {
        ImageGenError::Transport(e.to_string())
    }
}

#[async_trait]
impl ImageGenerator for PollinationsClient {
    async fn fetch_image(&self, prompt: &str) -> Result<Vec<u8>, ImageGenError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ImageGenError::Config(POLLINATIONS_KEY_VAR))?;

        let cleaned = sanitize_image_prompt(prompt);
        let seed: u32 = rand::thread_rng().gen();
        let url = self.build_url(&cleaned, seed)?;
        debug!(%url, "requesting image");

        let resp = self
            .http
            .get(url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(ImageGenError::UnexpectedContent { content_type });
        }

        let bytes = resp.bytes().await.map_err(transport_error)?;
        debug!(len = bytes.len(), "image received");
        Ok(bytes.to_vec())
    }
}
