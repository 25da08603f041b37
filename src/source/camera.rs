//! Live camera source
//!
//! Captures from a V4L2 device through an ffmpeg subprocess configured for
//! low-latency baseline H.264 and consumes its Annex-B stdout. If the
//! encoder dies the source reports failure and stays dead; recovery is a
//! camera switch from above.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SourceError;

use super::encoder::{drain_channel, EncoderProcess, NAL_CHANNEL_CAPACITY};

/// Encoder subprocess capturing a local camera device
pub struct CameraSource {
    device: String,
    process: Option<EncoderProcess>,
    nal_rx: mpsc::Receiver<Bytes>,
}

impl CameraSource {
    /// Spawn the capture encoder for `device`
    pub fn open(device: &str, fps: u32) -> Result<Self, SourceError> {
        let (nal_tx, nal_rx) = mpsc::channel(NAL_CHANNEL_CAPACITY);
        let args = capture_args(device, fps);
        let process = EncoderProcess::spawn(&format!("camera {}", device), &args, nal_tx, false)?;

        Ok(Self {
            device: device.to_string(),
            process: Some(process),
            nal_rx,
        })
    }

    /// Drain up to `max` NAL bodies accumulated from the encoder
    pub fn pull(&mut self, max: usize) -> Result<Vec<Bytes>, SourceError> {
        drain_channel(&mut self.nal_rx, max)
    }

    pub async fn close(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown().await;
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

#[cfg(test)]
impl CameraSource {
    /// Construct from a bare channel, without spawning a subprocess
    pub(crate) fn from_parts(device: &str, nal_rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            device: device.to_string(),
            process: None,
            nal_rx,
        }
    }
}

/// ffmpeg arguments: V4L2 capture into zero-latency baseline 3.1 H.264,
/// Annex-B on stdout
fn capture_args(device: &str, fps: u32) -> Vec<String> {
    let fps = fps.to_string();
    [
        "-f", "v4l2",
        "-framerate", fps.as_str(),
        "-video_size", "640x480",
        "-i", device,
        "-c:v", "libx264",
        "-profile:v", "baseline",
        "-level", "3.1",
        "-preset", "veryfast",
        "-tune", "zerolatency",
        "-b:v", "1500k",
        "-maxrate", "1500k",
        "-bufsize", "3000k",
        "-g", "60",
        "-keyint_min", "30",
        "-bf", "0",
        "-pix_fmt", "yuv420p",
        "-bsf:v", "h264_mp4toannexb",
        "-f", "h264",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
