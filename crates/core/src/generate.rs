//! # Content Generation
//!
//! The generation collaborator: turns a brief into a content tree rooted at
//! `index.html`. The orchestrator only sees the [`SiteGenerator`] trait; the
//! production implementation posts an OpenRouter-style chat-completions
//! request and isolates the HTML payload from whatever prose or fencing the
//! model wraps around it.
//!
//! Attachments referenced by the trigger are downloaded into `assets/` before
//! the prompt is built, so the model can reference them by relative path.
//! Attachment failures degrade to warnings; publish correctness never depends
//! on them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{DeployError, Result};

const LLM_TIMEOUT: Duration = Duration::from_secs(60);
const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(45);
const PREVIEW_LIMIT: usize = 1200;
const PREVIEW_PROMPT_LIMIT: usize = 600;

/// A file referenced by the inbound trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
}

/// Everything the generator needs to know about one round.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub brief: String,
    pub task: String,
    pub round: u32,
    pub attachments: Vec<Attachment>,
}

/// Seam between the orchestrator and the content generator.
#[async_trait]
pub trait SiteGenerator: Send + Sync {
    /// Populate `output_dir` with the generated site; `index.html` must exist
    /// on success.
    async fn generate(&self, request: &GenerationRequest, output_dir: &Path) -> Result<()>;
}

/// Production generator backed by a hosted chat-completions endpoint.
pub struct LlmGenerator {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl LlmGenerator {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.llm_api_key.clone().ok_or_else(|| {
            DeployError::CredentialsMissing("OPENAI_API_KEY is not configured".to_string())
        })?;
        Ok(Self::new(
            settings.llm_api_url.clone(),
            api_key,
            settings.llm_model.clone(),
        ))
    }
}

#[async_trait]
impl SiteGenerator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest, output_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(output_dir).await?;

        let downloaded =
            download_attachments(&self.http, &request.attachments, output_dir).await?;
        let user_prompt = build_user_prompt(request, &downloaded);

        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are an expert frontend developer. Generate ONLY the complete \
                                HTML code with embedded CSS and JavaScript. DO NOT include \
                                explanations, markdown formatting, or code fences.",
                },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": 0.3,
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(LLM_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|err| DeployError::Generation(format!("API request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::Generation(format!(
                "API request failed ({status}): {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|err| DeployError::Generation(format!("API response unreadable: {err}")))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                DeployError::Generation("API response carried no message content".to_string())
            })?;

        let html = extract_html(content);
        let output_file = output_dir.join("index.html");
        tokio::fs::write(&output_file, html).await?;
        info!(path = %output_file.display(), "generated site entry point");
        Ok(())
    }
}

fn build_user_prompt(request: &GenerationRequest, attachments: &[AttachmentInfo]) -> String {
    let round_context = if request.round == 1 {
        "You are creating the initial version of this project."
    } else {
        "You are updating an existing project. Apply the new requirements while preserving \
         useful structure. Replace outdated content when necessary."
    };

    let mut prompt = format!(
        "Project brief:\n{}\n\nContext:\n- {}\n- Task: {}\n- Round: {}",
        request.brief.trim(),
        round_context,
        request.task,
        request.round
    );

    if let Some(attachment_notes) = build_attachments_prompt(attachments) {
        prompt.push_str("\n\n");
        prompt.push_str(&attachment_notes);
    }

    prompt.push_str(
        "\n\nDeliver a single HTML file that:\n\
         - Starts with <!DOCTYPE html> and includes <html>, <head>, and <body>.\n\
         - Embeds all CSS inside <style> tags and scripts inside <script> tags.\n\
         - Uses relative paths when loading any downloaded attachment (e.g., ./assets/filename).\n\
         - Provides graceful error handling for network fetches.\n\
         - Includes thoughtful, mobile-friendly design.",
    );
    prompt
}

/// Isolate the HTML document from an LLM reply: prefer a fenced code block,
/// then fall back to slicing from `<!DOCTYPE` (or `<html`) to `</html>`.
fn extract_html(content: &str) -> String {
    let fence = Regex::new(r"(?si)```(?:html)?\s*\n?(.*?)```").expect("static regex");
    let mut content = match fence.captures(content) {
        Some(caps) => caps[1].trim().to_string(),
        None => content.trim().to_string(),
    };

    if !content.starts_with("<!DOCTYPE") && !content.starts_with("<html") {
        let doc = Regex::new(r"(?si)(<!DOCTYPE[^>]*>.*?</html>)").expect("static regex");
        let tag = Regex::new(r"(?si)(<html[^>]*>.*?</html>)").expect("static regex");
        if let Some(caps) = doc.captures(&content).or_else(|| tag.captures(&content)) {
            content = caps[1].to_string();
        }
    }
    content.trim().to_string()
}

/// Facts about one downloaded attachment, folded into the prompt.
#[derive(Debug, Clone)]
struct AttachmentInfo {
    relative_path: String,
    content_type: String,
    bytes: usize,
    preview: Option<String>,
}

async fn download_attachments(
    http: &reqwest::Client,
    raw: &[Attachment],
    output_dir: &Path,
) -> Result<Vec<AttachmentInfo>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let assets_dir = output_dir.join("assets");
    tokio::fs::create_dir_all(&assets_dir).await?;
    let mut downloaded = Vec::new();

    for (idx, attachment) in raw.iter().enumerate() {
        let url = attachment.url.trim();
        if url.is_empty() {
            continue;
        }

        let name_hint = attachment
            .name
            .clone()
            .unwrap_or_else(|| derive_name_from_url(url, idx));
        let dest = unique_path(assets_dir.join(sanitize_filename(&name_hint))).await;

        let (data, content_type) = match fetch_attachment_bytes(http, url).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(name = name_hint, %err, "failed to download attachment");
                continue;
            }
        };
        tokio::fs::write(&dest, &data).await?;

        let preview = if is_text_like(&content_type, &dest) {
            String::from_utf8(data.clone())
                .ok()
                .map(|text| text.chars().take(PREVIEW_LIMIT).collect())
        } else {
            None
        };

        let relative_path = dest
            .strip_prefix(output_dir)
            .unwrap_or(&dest)
            .to_string_lossy()
            .replace('\\', "/");
        downloaded.push(AttachmentInfo {
            relative_path,
            content_type,
            bytes: data.len(),
            preview,
        });
    }

    Ok(downloaded)
}

async fn fetch_attachment_bytes(
    http: &reqwest::Client,
    url: &str,
) -> Result<(Vec<u8>, String)> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (header, data) = rest.split_once(',').ok_or_else(|| {
            DeployError::Generation("invalid data URI in attachment".to_string())
        })?;
        let media_type = header
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .unwrap_or("application/octet-stream")
            .to_string();
        if header.contains(";base64") {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|err| DeployError::Generation(format!("invalid base64 data URI: {err}")))?;
            return Ok((bytes, media_type));
        }
        let decoded = urlencoding::decode(data)
            .map_err(|err| DeployError::Generation(format!("invalid data URI encoding: {err}")))?;
        return Ok((decoded.into_owned().into_bytes(), media_type));
    }

    let response = http.get(url).timeout(ATTACHMENT_TIMEOUT).send().await?;
    if !response.status().is_success() {
        return Err(DeployError::Generation(format!(
            "HTTP {} while downloading {url}",
            response.status()
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = response.bytes().await?.to_vec();
    Ok((bytes, content_type))
}

fn derive_name_from_url(url: &str, idx: usize) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/');
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => format!("attachment-{}", idx + 1),
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

/// Append `-1`, `-2`, ... until the path is free.
async fn unique_path(path: PathBuf) -> PathBuf {
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut counter = 1;
    loop {
        let candidate = parent.join(format!("{stem}-{counter}{ext}"));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        counter += 1;
    }
}

fn is_text_like(content_type: &str, path: &Path) -> bool {
    if content_type.starts_with("text/") {
        return true;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("csv" | "md" | "json" | "txt" | "tsv")
    )
}

fn build_attachments_prompt(attachments: &[AttachmentInfo]) -> Option<String> {
    if attachments.is_empty() {
        return None;
    }
    let mut lines = vec![
        "Attachments are available in the ./assets directory (relative to index.html). \
         Use fetch('./assets/<name>') or <img src='./assets/<name>'> as needed."
            .to_string(),
        "Attachment details:".to_string(),
    ];
    for item in attachments {
        let mut line = format!(
            "- {} ({}, {} bytes)",
            item.relative_path, item.content_type, item.bytes
        );
        if let Some(preview) = &item.preview {
            let snippet: String = preview.trim().chars().take(PREVIEW_PROMPT_LIMIT).collect();
            line.push_str(&format!("\n  Preview snippet:\n  {snippet}"));
        }
        lines.push(line);
    }
    Some(lines.join("\n"))
}
