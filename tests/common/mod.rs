//! Shared test doubles for the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use dream_bgremove::{
    encode_png, DialogControls, InferenceRequest, InferenceTransport, PredictionOutput,
    ProgressEvent, RemovalError, Result,
};
use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Solid test image
pub fn solid_image(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
}

/// PNG bytes of a solid cutout
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 0]))).unwrap()
}

/// Split bytes into `parts` roughly equal chunks
pub fn split_chunks(bytes: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let parts = parts.max(1);
    let size = (bytes.len() + parts - 1) / parts;
    bytes.chunks(size.max(1)).map(<[u8]>::to_vec).collect()
}

/// One-shot latch released from the test thread
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// What the mock transport answers
#[derive(Clone)]
pub enum Reply {
    /// Stream these chunks as the output
    Chunks(Vec<Vec<u8>>),
    /// Succeed without an output handle
    Nothing,
    /// Fail with a service error carrying this text
    Fail(String),
    /// Block the call until the gate opens, then stream the bytes
    GatedCall(Gate, Vec<u8>),
    /// Return at once but hold the output stream until the gate opens
    GatedDownload(Gate, Vec<u8>),
}

/// Transport answering every call with a scripted reply
pub struct MockTransport {
    reply: Reply,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceTransport for MockTransport {
    async fn run(&self, request: &InferenceRequest) -> Result<Option<PredictionOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys
            .lock()
            .unwrap()
            .push(request.api_key.expose().to_string());
        assert!(!request.source_image_bytes.is_empty());

        match &self.reply {
            Reply::Chunks(chunks) => Ok(Some(PredictionOutput::from_chunks(chunks.clone()))),
            Reply::Nothing => Ok(None),
            Reply::Fail(message) => Err(RemovalError::service(message.clone())),
            Reply::GatedCall(gate, bytes) => {
                gate.wait();
                Ok(Some(PredictionOutput::from_bytes(bytes.clone())))
            },
            Reply::GatedDownload(gate, bytes) => {
                let gate = gate.clone();
                let bytes = bytes.clone();
                let stream = futures::stream::once(async move {
                    gate.wait();
                    Ok(bytes)
                })
                .boxed();
                Ok(Some(PredictionOutput::from_stream(stream)))
            },
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Everything the orchestrator did to the dialog controls
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Status(ProgressEvent),
    Enabled(bool),
}

/// Controls recording into a log shared with the test
#[derive(Clone, Default)]
pub struct RecordingControls {
    log: Arc<Mutex<Vec<ControlEvent>>>,
}

impl RecordingControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ControlEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ControlEvent::Status(status) => Some(status.message),
                ControlEvent::Enabled(_) => None,
            })
            .collect()
    }

    pub fn saw(&self, message: &str) -> bool {
        self.messages().iter().any(|seen| seen == message)
    }

    pub fn last_enabled(&self) -> Option<bool> {
        self.events().into_iter().rev().find_map(|event| match event {
            ControlEvent::Enabled(enabled) => Some(enabled),
            ControlEvent::Status(_) => None,
        })
    }
}

impl DialogControls for RecordingControls {
    fn update_status(&mut self, event: &ProgressEvent) {
        self.log
            .lock()
            .unwrap()
            .push(ControlEvent::Status(event.clone()));
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.log.lock().unwrap().push(ControlEvent::Enabled(enabled));
    }
}

/// Poll until `condition` holds, panicking after a few seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
