use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::chat::GroundingSource;
use shared::gateway_api::{HistoryPart, HistoryRole, StreamChunk, TextRequest, TextResponse};
use std::env;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash-preview-04-17";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-3.0-generate-002";

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline_image(mime_type: String, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(Blob { mime_type, data }),
        }
    }
}

#[derive(Debug, Serialize)]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GroundingMetadata {
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: String,
    #[serde(default)]
    mime_type: Option<String>,
}

pub struct GeminiClient {
    http: Client,
    auth_token: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    /// Build a client from the `GEMINI_API_KEY` environment variable and
    /// the default model pair.
    pub fn new() -> Result<Self> {
        let key = env::var("GEMINI_API_KEY").map_err(|_| anyhow!("GEMINI_API_KEY not set"))?;
        Ok(Self::from_key(key, DEFAULT_TEXT_MODEL, DEFAULT_IMAGE_MODEL))
    }

    pub fn from_key(key: impl Into<String>, text_model: &str, image_model: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            auth_token: key.into(),
            text_model: text_model.to_string(),
            image_model: image_model.to_string(),
        }
    }

    /// Non-streaming text generation.
    pub async fn generate(&self, request: &TextRequest) -> Result<TextResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            API_BASE, self.text_model, self.auth_token
        );
        let body = build_request(request);
        let resp = self.http.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(api_error("gemini", resp).await);
        }
        let body: GenerateResponse = resp.json().await?;
        let (text, sources) = collect_candidate(&body);
        Ok(TextResponse { text, sources })
    }

    /// Streaming text generation over SSE.
    ///
    /// Contract: a failure before any chunk arrives returns `Err`. Once
    /// the stream is open, failures are delivered as `StreamChunk::Error`
    /// and the method returns `Ok(())`.
    pub async fn generate_stream(
        &self,
        request: &TextRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            API_BASE, self.text_model, self.auth_token
        );
        let body = build_request(request);
        let resp = self.http.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(api_error("gemini", resp).await);
        }

        let mut parser = crate::sse::SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                match serde_json::from_str::<GenerateResponse>(&event.data) {
                    Ok(resp) => {
                        let (text, sources) = collect_candidate(&resp);
                        if !text.is_empty() || sources.is_some() {
                            let _ = tx.send(StreamChunk::Delta { text, sources });
                        }
                    }
                    Err(e) => {
                        tracing::debug!("skipping unparseable SSE event: {}", e);
                    }
                }
            }
        }

        let _ = tx.send(StreamChunk::Done);
        Ok(())
    }

    /// Image generation via the Imagen predict endpoint. Returns a data
    /// URL suitable for direct display.
    pub async fn generate_image(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:predict?key={}",
            API_BASE, self.image_model, self.auth_token
        );
        let body = serde_json::json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1, "outputMimeType": "image/jpeg" },
        });
        let resp = self.http.post(url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(api_error("imagen", resp).await);
        }
        let body: PredictResponse = resp.json().await?;
        let prediction = body
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no image was generated"))?;
        let mime = prediction
            .mime_type
            .unwrap_or_else(|| "image/jpeg".to_string());
        Ok(format!(
            "data:{};base64,{}",
            mime, prediction.bytes_base64_encoded
        ))
    }
}

/// Map a gateway request onto the wire shape: prior history turns, then
/// the current user turn with any attached image ahead of the prompt text.
fn build_request(request: &TextRequest) -> GenerateRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|item| Content {
            role: Some(match item.role {
                HistoryRole::User => "user",
                HistoryRole::Model => "model",
            }),
            parts: item
                .parts
                .iter()
                .map(|part| match part {
                    HistoryPart::Text(text) => Part::text(text.clone()),
                    HistoryPart::InlineImage { mime_type, data } => {
                        Part::inline_image(mime_type.clone(), data.clone())
                    }
                })
                .collect(),
        })
        .collect();

    let mut parts = Vec::new();
    if let Some(image) = &request.image {
        if image.is_image() {
            parts.push(Part::inline_image(
                image.mime_type.clone(),
                image.content.clone(),
            ));
        }
    }
    parts.push(Part::text(request.prompt.clone()));
    contents.push(Content {
        role: Some("user"),
        parts,
    });

    GenerateRequest {
        contents,
        system_instruction: request.system_instruction.as_ref().map(|text| Content {
            role: None,
            parts: vec![Part::text(text.clone())],
        }),
        tools: request.use_search.then(|| {
            vec![Tool {
                google_search: serde_json::json!({}),
            }]
        }),
    }
}

/// Pull the first candidate's concatenated text and grounding sources.
fn collect_candidate(resp: &GenerateResponse) -> (String, Option<Vec<GroundingSource>>) {
    let Some(candidate) = resp.candidates.first() else {
        return (String::new(), None);
    };
    let text = candidate
        .content
        .as_ref()
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();
    let sources = candidate.grounding_metadata.as_ref().and_then(|meta| {
        let sources: Vec<GroundingSource> = meta
            .grounding_chunks
            .iter()
            .filter_map(|chunk| chunk.web.as_ref())
            .map(|web| GroundingSource {
                uri: web.uri.clone(),
                title: web.title.clone(),
            })
            .collect();
        (!sources.is_empty()).then_some(sources)
    });
    (text, sources)
}

async fn api_error(provider: &str, resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(800).collect();
    if detail.trim().is_empty() {
        anyhow!("{} error: {}", provider, status)
    } else {
        anyhow!("{} error: {}\n{}", provider, status, detail)
    }
}
