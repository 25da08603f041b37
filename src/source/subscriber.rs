//! Raw-image subscription source
//!
//! Subscribes to a topic of raw camera frames and re-encodes them to
//! H.264 through an ffmpeg subprocess. Frame payloads carry a fixed
//! 8-byte header followed by packed BGR pixels:
//!
//! ```text
//! | width: u32 BE | height: u32 BE | BGR24 data (width * height * 3) |
//! ```
//!
//! The first frame fixes the encoder dimensions; a later dimension change
//! restarts the encoder. Frames whose payload length does not match the
//! advertised dimensions are dropped with a warning.

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::SourceError;

use super::encoder::{drain_channel, EncoderProcess, NAL_CHANNEL_CAPACITY};

/// Raw image frame header length (width + height)
const FRAME_HEADER_LEN: usize = 8;

/// Bytes per BGR pixel
const BYTES_PER_PIXEL: usize = 3;

/// MQTT-subscribed raw image stream re-encoded to H.264
pub struct SubscriberSource {
    topic: String,
    token: CancellationToken,
    worker: Option<JoinHandle<()>>,
    client: AsyncClient,
    nal_rx: mpsc::Receiver<Bytes>,
}

impl SubscriberSource {
    /// Connect a dedicated broker session and start the encode worker
    pub async fn open(topic: &str, config: &StreamConfig) -> Result<Self, SourceError> {
        let mut options = MqttOptions::new(
            format!("{}-img", config.client_id),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, 32);
        let (nal_tx, nal_rx) = mpsc::channel(NAL_CHANNEL_CAPACITY);
        let token = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            event_loop,
            client.clone(),
            topic.to_string(),
            config.fps,
            nal_tx,
            token.child_token(),
        ));

        tracing::info!(topic = %topic, "Image subscription started");

        Ok(Self {
            topic: topic.to_string(),
            token,
            worker: Some(worker),
            client,
            nal_rx,
        })
    }

    /// Drain up to `max` NAL bodies from the re-encoder
    pub fn pull(&mut self, max: usize) -> Result<Vec<Bytes>, SourceError> {
        drain_channel(&mut self.nal_rx, max)
    }

    pub async fn close(&mut self) {
        self.token.cancel();
        let _ = self.client.disconnect().await;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        tracing::info!(topic = %self.topic, "Image subscription stopped");
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Per-stream encode state: the running encoder and the dimensions it was
/// spawned with
struct EncodeState {
    encoder: Option<EncoderProcess>,
    width: u32,
    height: u32,
    frames: u64,
}

impl EncodeState {
    fn new() -> Self {
        Self { encoder: None, width: 0, height: 0, frames: 0 }
    }

    async fn stop_encoder(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            encoder.shutdown().await;
        }
    }
}

async fn run_worker(
    mut event_loop: rumqttc::EventLoop,
    client: AsyncClient,
    topic: String,
    fps: u32,
    nal_tx: mpsc::Sender<Bytes>,
    stop: CancellationToken,
) {
    let mut state = EncodeState::new();

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                    tracing::error!(topic = %topic, error = %e, "Image subscribe failed");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_frame(&mut state, &publish.payload, &topic, fps, &nal_tx).await;
            }
            Ok(_) => {}
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                tracing::warn!(topic = %topic, error = %e, "Image stream connection lost");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    state.stop_encoder().await;
}

async fn handle_frame(
    state: &mut EncodeState,
    payload: &[u8],
    topic: &str,
    fps: u32,
    nal_tx: &mpsc::Sender<Bytes>,
) {
    let Some((width, height, pixels)) = parse_frame(payload) else {
        tracing::warn!(topic = %topic, len = payload.len(), "Dropping malformed image frame");
        return;
    };

    // First frame fixes the encoder dimensions; a change restarts it.
    if state.encoder.is_none() || width != state.width || height != state.height {
        if state.encoder.is_some() {
            tracing::info!(
                topic = %topic,
                old_width = state.width,
                old_height = state.height,
                width = width,
                height = height,
                "Image dimensions changed, restarting encoder"
            );
        }
        state.stop_encoder().await;
        state.width = width;
        state.height = height;

        let args = reencode_args(width, height, fps);
        match EncoderProcess::spawn(&format!("reencode {}", topic), &args, nal_tx.clone(), true) {
            Ok(encoder) => state.encoder = Some(encoder),
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Failed to start re-encoder");
                return;
            }
        }
    }

    let expected = state.width as usize * state.height as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        tracing::warn!(
            topic = %topic,
            expected = expected,
            actual = pixels.len(),
            "Dropping image frame with mismatched size"
        );
        return;
    }

    if let Some(encoder) = state.encoder.as_mut() {
        if let Err(e) = encoder.write_frame(pixels).await {
            tracing::error!(topic = %topic, error = %e, "Write to re-encoder failed");
            state.stop_encoder().await;
        } else {
            state.frames += 1;
            if state.frames % 300 == 1 {
                tracing::debug!(topic = %topic, frames = state.frames, "Re-encoding image frames");
            }
        }
    }
}

/// Split a frame payload into (width, height, pixel data)
fn parse_frame(payload: &[u8]) -> Option<(u32, u32, &[u8])> {
    if payload.len() < FRAME_HEADER_LEN {
        return None;
    }
    let width = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let height = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height, &payload[FRAME_HEADER_LEN..]))
}

/// ffmpeg arguments: raw BGR frames on stdin, Annex-B H.264 on stdout
fn reencode_args(width: u32, height: u32, fps: u32) -> Vec<String> {
    let size = format!("{}x{}", width, height);
    let fps = fps.to_string();
    [
        "-f", "rawvideo",
        "-pixel_format", "bgr24",
        "-video_size", size.as_str(),
        "-framerate", fps.as_str(),
        "-i", "pipe:0",
        // Encoders want even dimensions.
        "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2",
        "-c:v", "libx264",
        "-preset", "veryfast",
        "-crf", "28",
        "-g", "60",
        "-bf", "0",
        "-refs", "1",
        "-threads", "0",
        "-pix_fmt", "yuv420p",
        "-r", fps.as_str(),
        "-bsf:v", "h264_mp4toannexb",
        "-f", "h264",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
