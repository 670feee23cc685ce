//! Gemini REST client for streaming chat and image generation

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::Engine as _;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use super::sse::SseDecoder;
use super::wire::{
    GenerateContentRequest, GenerateContentResponse, RequestContent, SystemInstruction, TextPart,
};
use super::{ChatChunk, ChatService, ChatStream, ImageService};
use crate::chat::{HistoryTurn, Role};
use crate::config::Config;
use crate::{Error, Result};

/// Client for the Gemini `generateContent` family of endpoints
pub struct GeminiClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    chat_model: String,
    image_model: String,
    instruction: String,
    search_grounding: bool,
}

impl GeminiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key: config.require_api_key()?,
            base_url: config.base_url.clone(),
            chat_model: config.models.chat.clone(),
            image_model: config.models.image.clone(),
            instruction: config.persona.instruction.clone(),
            search_grounding: config.chat.search_grounding,
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{model}:{method}", self.base_url)
    }
}

/// Build the streaming chat request body
fn build_chat_request<'a>(
    prompt: &'a str,
    history: &'a [HistoryTurn],
    instruction: &'a str,
    search_grounding: bool,
) -> GenerateContentRequest<'a> {
    let mut contents: Vec<RequestContent<'a>> = history
        .iter()
        .map(|turn| RequestContent {
            role: turn.role.wire_name(),
            parts: vec![TextPart { text: &turn.text }],
        })
        .collect();

    contents.push(RequestContent {
        role: Role::User.wire_name(),
        parts: vec![TextPart { text: prompt }],
    });

    let tools = if search_grounding {
        vec![serde_json::json!({ "google_search": {} })]
    } else {
        Vec::new()
    };

    GenerateContentRequest {
        contents,
        system_instruction: SystemInstruction::new(instruction),
        tools,
        generation_config: None,
    }
}

/// Build the image generation request body
fn build_image_request(prompt: &str) -> GenerateContentRequest<'_> {
    GenerateContentRequest {
        contents: vec![RequestContent {
            role: Role::User.wire_name(),
            parts: vec![TextPart { text: prompt }],
        }],
        system_instruction: None,
        tools: Vec::new(),
        generation_config: Some(serde_json::json!({
            "responseModalities": ["TEXT", "IMAGE"]
        })),
    }
}

/// Parse one streamed `data:` payload into a chunk
fn parse_chat_chunk(data: &str) -> Result<ChatChunk> {
    let response: GenerateContentResponse = serde_json::from_str(data)?;

    if let Some(err) = response.error {
        return Err(Error::Chat(format!(
            "Gemini API error {}: {}",
            err.code.unwrap_or_default(),
            err.message
        )));
    }

    Ok(ChatChunk {
        text: response.text(),
        sources: response.sources(),
    })
}

/// Pull the first inline image out of a response as a `data:` URL
fn extract_image_url(response: &GenerateContentResponse) -> Option<String> {
    response
        .parts()
        .iter()
        .filter_map(|p| p.inline_data.as_ref())
        .find(|d| d.mime_type.starts_with("image/"))
        .map(|d| format!("data:{};base64,{}", d.mime_type, d.data))
}

/// Split a `data:` URL into its MIME type and decoded bytes
///
/// # Errors
///
/// Returns error if the URL is not a base64 `data:` URL
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| Error::Image("not a data URL".to_string()))?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| Error::Image("malformed data URL".to_string()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| Error::Image("data URL is not base64".to_string()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::Image(format!("invalid image data: {e}")))?;

    Ok((mime.to_string(), bytes))
}

struct SseState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn an SSE response body into a stream of chunks
fn chunk_stream(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> ChatStream {
    let state = SseState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(data) = st.pending.pop_front() {
                return Some((parse_chat_chunk(&data), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let events = st.decoder.push(&bytes);
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "chat stream interrupted");
                    st.done = true;
                    return Some((Err(Error::Http(e)), st));
                }
                None => {
                    st.done = true;
                    let tail = st.decoder.finish();
                    st.pending.extend(tail);
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ChatService for GeminiClient {
    async fn stream_chat(&self, prompt: &str, history: &[HistoryTurn]) -> Result<ChatStream> {
        let request =
            build_chat_request(prompt, history, &self.instruction, self.search_grounding);
        let url = format!(
            "{}?alt=sse",
            self.model_url(&self.chat_model, "streamGenerateContent")
        );

        tracing::debug!(
            model = %self.chat_model,
            history = history.len(),
            "starting chat stream"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini chat API error");
            return Err(Error::Chat(format!("Gemini API error {status}: {body}")));
        }

        let body = response.bytes_stream().map_ok(|b| b.to_vec()).boxed();
        Ok(chunk_stream(body))
    }
}

#[async_trait]
impl ImageService for GeminiClient {
    async fn generate_image(&self, prompt: &str) -> Result<Option<String>> {
        let request = build_image_request(prompt);
        let url = self.model_url(&self.image_model, "generateContent");

        tracing::debug!(model = %self.image_model, "requesting image");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "image request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini image API error");
            return Err(Error::Image(format!("Gemini API error {status}: {body}")));
        }

        let result: GenerateContentResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse image response");
            e
        })?;

        let url = extract_image_url(&result);
        tracing::info!(found = url.is_some(), "image generation complete");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let history = vec![
            HistoryTurn {
                role: Role::User,
                text: "hi".to_string(),
            },
            HistoryTurn {
                role: Role::Assistant,
                text: "hello".to_string(),
            },
        ];
        let request = build_chat_request("how are you?", &history, "Be kind.", true);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "how are you?");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be kind.");
        assert!(json["tools"][0].get("google_search").is_some());
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn test_chat_request_without_grounding_or_instruction() {
        let request = build_chat_request("hey", &[], "  ", false);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_image_request_asks_for_image_modality() {
        let json = serde_json::to_value(build_image_request("a fox")).unwrap();
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn test_parse_chunk_text_and_sources() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"thinking...","thought":true},{"text":"Hel"},{"text":"lo"}]},
            "groundingMetadata":{"groundingChunks":[{"web":{"uri":"https://a","title":"A"}},{"web":{"uri":"https://b"}}]}}]}"#;
        let chunk = parse_chat_chunk(data).unwrap();
        assert_eq!(chunk.text, "Hello");
        assert_eq!(chunk.sources.len(), 2);
        assert_eq!(chunk.sources[1].title, "https://b");
    }

    #[test]
    fn test_parse_chunk_error_payload() {
        let data = r#"{"error":{"code":429,"message":"quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = parse_chat_chunk(data).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_extract_image_url() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Here you go"},{"inlineData":{"mimeType":"image/png","data":"iVBORw0K"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            extract_image_url(&response).as_deref(),
            Some("data:image/png;base64,iVBORw0K")
        );

        let empty: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[{"text":"no"}]}}]}"#)
                .unwrap();
        assert!(extract_image_url(&empty).is_none());
    }

    #[test]
    fn test_decode_data_url() {
        let (mime, bytes) = decode_data_url("data:image/png;base64,AQID").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, [1, 2, 3]);

        assert!(decode_data_url("https://example.com/a.png").is_err());
        assert!(decode_data_url("data:image/png,raw").is_err());
    }

    #[tokio::test]
    async fn test_chunk_stream_preserves_order_across_splits() {
        let parts: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\ndata: {\"cand".to_vec()),
            Ok(b"idates\":[{\"content\":{\"parts\":[{\"text\":\"lo!\"}]}}]}\r\n\r\n".to_vec()),
        ];
        let stream = chunk_stream(futures::stream::iter(parts).boxed());
        let texts: Vec<String> = stream.map(|c| c.unwrap().text).collect().await;
        assert_eq!(texts, ["Hel", "lo!"]);
    }
}
