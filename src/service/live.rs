//! Gemini Live websocket client
//!
//! A live connection is split in two: a [`LiveSender`] for outbound audio and
//! an ordered channel of [`LiveEvent`]s fed by a single reader task.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::wire::Content;
use crate::audio::AudioPayload;
use crate::config::Config;
use crate::{Error, Result};

/// Events buffered between the reader task and the session loop
const EVENT_QUEUE: usize = 64;

/// Session configuration sent at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSetup {
    /// Live model identifier (without the `models/` prefix)
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Persona instruction
    pub instruction: String,
}

impl LiveSetup {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.models.live.clone(),
            voice: config.live.voice.clone(),
            instruction: config.persona.instruction.clone(),
        }
    }

    /// The `setup` message opening a session
    #[must_use]
    pub fn to_message(&self) -> serde_json::Value {
        let mut setup = serde_json::json!({
            "setup": {
                "model": format!("models/{}", self.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": self.voice }
                        }
                    }
                }
            }
        });

        if !self.instruction.trim().is_empty() {
            setup["setup"]["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": self.instruction }]
            });
        }

        setup
    }
}

/// Inbound session event, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Setup acknowledged; audio may flow
    Open,
    /// A chunk of assistant audio
    Audio(AudioPayload),
    /// The user started talking over the assistant
    Interrupted,
    /// The assistant finished its turn
    TurnComplete,
    /// Transport or protocol error
    Error(String),
    /// The server closed the session
    Closed(Option<String>),
}

/// Outbound half of a live connection
#[async_trait]
pub trait LiveSender: Send {
    /// Send one realtime audio frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be written
    async fn send_audio(&mut self, payload: &AudioPayload) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails
    async fn close(&mut self) -> Result<()>;
}

/// An established connection
pub struct LiveConnection {
    pub sender: Box<dyn LiveSender>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// Opens live connections
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and send `setup`
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveConnection>;
}

/// The `realtimeInput` message carrying one audio frame
#[must_use]
pub fn realtime_input_message(payload: &AudioPayload) -> serde_json::Value {
    serde_json::json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": payload.mime_type,
                "data": payload.data
            }]
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

/// Map one server message to events
///
/// Audio parts come first, then interruption, then turn completion.
#[must_use]
pub fn parse_server_message(text: &str) -> Vec<LiveEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable live message");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LiveEvent::Open);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .filter(|d| d.mime_type.starts_with("audio/"))
                    .map(|d| {
                        LiveEvent::Audio(AudioPayload {
                            data: d.data,
                            mime_type: d.mime_type,
                        })
                    }),
            );
        }
        if content.interrupted {
            events.push(LiveEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(LiveEvent::TurnComplete);
        }
    }

    if let Some(go_away) = message.go_away {
        tracing::warn!(details = %go_away, "live server is going away");
    }

    events
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the Gemini Live websocket
pub struct GeminiLiveConnector {
    url: String,
    api_key: SecretString,
}

impl GeminiLiveConnector {
    /// Create a connector from configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            url: config.live.url.clone(),
            api_key: config.require_api_key()?,
        })
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveConnection> {
        let url = format!("{}?key={}", self.url, self.api_key.expose_secret());

        tracing::debug!(model = %setup.model, voice = %setup.voice, "connecting live session");

        let (socket, _) = connect_async(url.as_str()).await.map_err(|e| {
            tracing::error!(error = %e, "live connect failed");
            Error::WebSocket(e.to_string())
        })?;

        let (mut write, read) = socket.split();

        write
            .send(Message::Text(setup.to_message().to_string()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let reader = tokio::spawn(read_events(read, tx));

        Ok(LiveConnection {
            sender: Box::new(GeminiLiveSender {
                write,
                reader,
                closed: false,
            }),
            events: rx,
        })
    }
}

/// Forward inbound frames to the event channel until the socket ends
async fn read_events(
    mut read: futures::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<LiveEvent>,
) {
    while let Some(frame) = read.next().await {
        let events = match frame {
            Ok(Message::Text(text)) => parse_server_message(&text),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => parse_server_message(text),
                Err(e) => {
                    tracing::warn!(error = %e, "non-UTF-8 live frame");
                    Vec::new()
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                tracing::info!(reason = ?reason, "live socket closed by server");
                let _ = tx.send(LiveEvent::Closed(reason)).await;
                return;
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "live socket error");
                let _ = tx.send(LiveEvent::Error(e.to_string())).await;
                let _ = tx.send(LiveEvent::Closed(None)).await;
                return;
            }
        };

        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    let _ = tx.send(LiveEvent::Closed(None)).await;
}

struct GeminiLiveSender {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl LiveSender for GeminiLiveSender {
    async fn send_audio(&mut self, payload: &AudioPayload) -> Result<()> {
        let message = realtime_input_message(payload).to_string();
        self.write
            .send(Message::Text(message))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self
            .write
            .close()
            .await
            .map_err(|e| Error::WebSocket(e.to_string()));
        self.reader.abort();

        tracing::debug!("live socket closed");
        result
    }
}

impl Drop for GeminiLiveSender {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> LiveSetup {
        LiveSetup {
            model: "live-test".to_string(),
            voice: "Puck".to_string(),
            instruction: "You are Leo.".to_string(),
        }
    }

    #[test]
    fn test_setup_message_shape() {
        let msg = setup().to_message();
        assert_eq!(msg["setup"]["model"], "models/live-test");
        assert_eq!(
            msg["setup"]["generationConfig"]["responseModalities"],
            serde_json::json!(["AUDIO"])
        );
        assert_eq!(
            msg["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(
            msg["setup"]["systemInstruction"]["parts"][0]["text"],
            "You are Leo."
        );
    }

    #[test]
    fn test_setup_without_instruction() {
        let mut s = setup();
        s.instruction = String::new();
        assert!(s.to_message()["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_realtime_input_message() {
        let payload = AudioPayload {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let msg = realtime_input_message(&payload);
        assert_eq!(msg["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");
        assert_eq!(
            msg["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }

    #[test]
    fn test_parse_setup_complete() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#),
            [LiveEvent::Open]
        );
    }

    #[test]
    fn test_parse_audio_and_turn_complete() {
        let events = parse_server_message(
            r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAE="}},
                {"text":"ignored"}
            ]},"turnComplete":true}}"#,
        );
        assert_eq!(
            events,
            [
                LiveEvent::Audio(AudioPayload {
                    data: "AAE=".to_string(),
                    mime_type: "audio/pcm;rate=24000".to_string(),
                }),
                LiveEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_interrupted() {
        assert_eq!(
            parse_server_message(r#"{"serverContent":{"interrupted":true}}"#),
            [LiveEvent::Interrupted]
        );
    }

    #[test]
    fn test_parse_garbage_yields_nothing() {
        assert!(parse_server_message("not json").is_empty());
        assert!(parse_server_message(r#"{"usageMetadata":{}}"#).is_empty());
    }
}
