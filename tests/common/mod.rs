//! Shared test doubles
//!
//! Every external boundary (chat stream, image generation, live socket,
//! microphone, speaker) has a scripted fake so the orchestrators can be
//! driven without network or audio hardware.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Notify, mpsc};

use leo_companion::audio::{
    AudioPayload, AudioSink, Microphone, OUTPUT_SAMPLE_RATE, OutputHandle, SourceId, Speaker,
    encode_pcm,
};
use leo_companion::chat::{HistoryTurn, Source};
use leo_companion::service::{LiveConnection, LiveSender};
use leo_companion::{
    ChatChunk, ChatService, ChatStream, Error, ImageService, LiveConnector, LiveEvent, LiveSetup,
    Result,
};

// --- chat ---------------------------------------------------------------

/// One streamed item of a scripted reply
#[derive(Debug, Clone)]
pub enum Frag {
    Text(&'static str),
    Sources(Vec<Source>),
    Fail,
}

/// A scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Stream(Vec<Frag>),
    FailToStart,
}

/// Chat service replaying scripted replies in order
#[derive(Default)]
pub struct FakeChat {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(String, Vec<HistoryTurn>)>>,
    gate: Option<Arc<Notify>>,
}

impl FakeChat {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Replies hold their first item until the gate is notified
    pub fn gated(replies: impl IntoIterator<Item = Reply>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<(String, Vec<HistoryTurn>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatService for FakeChat {
    async fn stream_chat(&self, prompt: &str, history: &[HistoryTurn]) -> Result<ChatStream> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), history.to_vec()));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Stream(vec![Frag::Text("ok")]));

        let frags = match reply {
            Reply::Stream(frags) => frags,
            Reply::FailToStart => return Err(Error::Chat("connection refused".to_string())),
        };

        let items = futures::stream::iter(frags.into_iter().map(|frag| match frag {
            Frag::Text(t) => Ok(ChatChunk::text(t)),
            Frag::Sources(sources) => Ok(ChatChunk {
                text: String::new(),
                sources,
            }),
            Frag::Fail => Err(Error::Chat("stream reset".to_string())),
        }));

        match self.gate.clone() {
            Some(gate) => {
                let wait = futures::stream::once(async move {
                    gate.notified().await;
                })
                .filter_map(|()| async { None::<Result<ChatChunk>> });
                Ok(wait.chain(items).boxed())
            }
            None => Ok(items.boxed()),
        }
    }
}

/// Scripted image outcome
#[derive(Debug, Clone)]
pub enum ImageResult {
    Url(&'static str),
    Empty,
    Fail,
}

/// Image service returning a fixed outcome
pub struct FakeImage {
    result: ImageResult,
    calls: AtomicUsize,
}

impl FakeImage {
    pub fn new(result: ImageResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageService for FakeImage {
    async fn generate_image(&self, _prompt: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.result {
            ImageResult::Url(url) => Ok(Some(url.to_string())),
            ImageResult::Empty => Ok(None),
            ImageResult::Fail => Err(Error::Image("quota exceeded".to_string())),
        }
    }
}

// --- live connection ----------------------------------------------------

/// Connector handing out one scripted connection
pub struct FakeConnector {
    events: Mutex<Option<mpsc::Receiver<LiveEvent>>>,
    fail: bool,
    pub connects: AtomicUsize,
    pub sent: Arc<Mutex<Vec<AudioPayload>>>,
    pub closed: Arc<AtomicBool>,
}

impl FakeConnector {
    /// A connector plus the sender the test uses to play the server
    pub fn new() -> (Arc<Self>, mpsc::Sender<LiveEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let connector = Arc::new(Self {
            events: Mutex::new(Some(rx)),
            fail: false,
            connects: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });
        (connector, tx)
    }

    /// A connector whose handshake always fails
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(None),
            fail: true,
            connects: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, _setup: &LiveSetup) -> Result<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::WebSocket("handshake rejected".to_string()));
        }

        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Live("already connected".to_string()))?;

        Ok(LiveConnection {
            sender: Box::new(FakeSender {
                sent: self.sent.clone(),
                closed: self.closed.clone(),
            }),
            events,
        })
    }
}

struct FakeSender {
    sent: Arc<Mutex<Vec<AudioPayload>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl LiveSender for FakeSender {
    async fn send_audio(&mut self, payload: &AudioPayload) -> Result<()> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// --- microphone ---------------------------------------------------------

/// Microphone fed by the test
pub struct FakeMic {
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    deny: bool,
    pub stopped: Arc<AtomicBool>,
}

impl FakeMic {
    /// A working microphone plus the sender used to push frames
    pub fn new() -> (Self, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(32);
        let mic = Self {
            frames: Some(rx),
            deny: false,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        (mic, tx)
    }

    /// A microphone whose permission is denied
    pub fn denied() -> Self {
        Self {
            frames: None,
            deny: true,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Microphone for FakeMic {
    fn start(&mut self) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.deny {
            return Err(Error::Microphone("permission denied".to_string()));
        }
        self.frames
            .take()
            .ok_or_else(|| Error::Microphone("already started".to_string()))
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// --- speaker ------------------------------------------------------------

/// Operations recorded by the fake sink
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOp {
    Schedule { id: SourceId, start: f64, len: usize },
    Stop(SourceId),
    Close,
}

/// Handles the test keeps to observe and drive the fake output
#[derive(Clone)]
pub struct SpeakerProbe {
    pub clock: Arc<Mutex<f64>>,
    pub ops: Arc<Mutex<Vec<SinkOp>>>,
    pub ended: mpsc::UnboundedSender<SourceId>,
}

impl SpeakerProbe {
    pub fn set_clock(&self, now: f64) {
        *self.clock.lock().unwrap() = now;
    }

    pub fn ops(&self) -> Vec<SinkOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Scheduled `(id, start, len)` triples in order
    pub fn scheduled(&self) -> Vec<(SourceId, f64, usize)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Schedule { id, start, len } => Some((id, start, len)),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                SinkOp::Stop(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.ops().contains(&SinkOp::Close)
    }

    /// Report a buffer as fully played
    pub fn finish(&self, id: SourceId) {
        self.ended.send(id).unwrap();
    }
}

/// Speaker backed by a manual clock
pub struct FakeSpeaker {
    probe: SpeakerProbe,
    ended: Option<mpsc::UnboundedReceiver<SourceId>>,
    fail: bool,
}

impl FakeSpeaker {
    pub fn new() -> (Self, SpeakerProbe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let probe = SpeakerProbe {
            clock: Arc::new(Mutex::new(0.0)),
            ops: Arc::new(Mutex::new(Vec::new())),
            ended: tx,
        };
        let speaker = Self {
            probe: probe.clone(),
            ended: Some(rx),
            fail: false,
        };
        (speaker, probe)
    }

    pub fn unavailable() -> Self {
        let (mut speaker, _) = Self::new();
        speaker.fail = true;
        speaker
    }
}

impl Speaker for FakeSpeaker {
    fn open(&mut self) -> Result<OutputHandle> {
        if self.fail {
            return Err(Error::Audio("no output device".to_string()));
        }
        let ended = self
            .ended
            .take()
            .ok_or_else(|| Error::Audio("already open".to_string()))?;
        Ok(OutputHandle {
            sink: Box::new(FakeSink {
                probe: self.probe.clone(),
            }),
            ended,
        })
    }
}

struct FakeSink {
    probe: SpeakerProbe,
}

impl AudioSink for FakeSink {
    fn now(&self) -> f64 {
        *self.probe.clock.lock().unwrap()
    }

    fn schedule(&mut self, id: SourceId, samples: Vec<f32>, start: f64) -> Result<()> {
        self.probe.ops.lock().unwrap().push(SinkOp::Schedule {
            id,
            start,
            len: samples.len(),
        });
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.probe.ops.lock().unwrap().push(SinkOp::Stop(id));
    }

    fn close(&mut self) {
        self.probe.ops.lock().unwrap().push(SinkOp::Close);
    }
}

// --- helpers ------------------------------------------------------------

/// A 24kHz inbound audio payload of `len` samples
pub fn inbound_audio(len: usize) -> LiveEvent {
    inbound_audio_at(len, OUTPUT_SAMPLE_RATE)
}

/// An inbound audio payload of `len` samples announced at `rate`
pub fn inbound_audio_at(len: usize, rate: u32) -> LiveEvent {
    let encoded = encode_pcm(&vec![0.25; len]);
    LiveEvent::Audio(AudioPayload {
        data: encoded.data,
        mime_type: format!("audio/pcm;rate={rate}"),
    })
}

/// Yield until `cond` holds
///
/// # Panics
///
/// Panics if the condition never becomes true
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
