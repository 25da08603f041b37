//! Video source adapters
//!
//! All adapters produce raw NAL unit bodies and share one narrow contract:
//! open by [`SourceSpec`], pull the next batch of NAL bodies, close. The
//! producer treats them interchangeably.
//!
//! ```text
//! Files        preloaded *.h264 files, length-prefixed, looped forever
//! Camera       ffmpeg capture subprocess, Annex-B on stdout
//! Subscriber   raw BGR frames from an MQTT topic, re-encoded via ffmpeg
//! ```

pub mod camera;
pub mod encoder;
pub mod files;
pub mod subscriber;

use std::path::PathBuf;

use bytes::Bytes;

use crate::config::StreamConfig;
use crate::error::SourceError;

use camera::CameraSource;
use files::FileSequenceSource;
use subscriber::SubscriberSource;

/// Parameters for one selectable camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Directory of pre-encoded `<prefix>-<N>.h264` files
    Files { dir: PathBuf },
    /// Live capture device encoded by a subprocess
    Camera { device: String },
    /// Raw-image topic re-encoded by a subprocess
    Subscription { topic: String },
}

impl SourceSpec {
    /// The built-in camera table. Index 1 (the default camera) is the
    /// forward FLIR; 2..=7 are the leopard ring cameras; 8 is the raw
    /// FLIR feed re-encoded on the fly.
    pub fn default_catalog() -> Vec<SourceSpec> {
        vec![
            SourceSpec::Files { dir: PathBuf::from("h264/flir_id8_image_resized_30fps") },
            SourceSpec::Files { dir: PathBuf::from("h264/leopard_id1_image_resized_30fps") },
            SourceSpec::Files { dir: PathBuf::from("h264/leopard_id3_image_resized_30fps") },
            SourceSpec::Files { dir: PathBuf::from("h264/leopard_id4_image_resized_30fps") },
            SourceSpec::Files { dir: PathBuf::from("h264/leopard_id5_image_resized_30fps") },
            SourceSpec::Files { dir: PathBuf::from("h264/leopard_id6_image_resized_30fps") },
            SourceSpec::Files { dir: PathBuf::from("h264/leopard_id7_image_resized_30fps") },
            SourceSpec::Subscription { topic: "cameras/flir/id8/image_raw".to_string() },
        ]
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Files { dir } => format!("files:{}", dir.display()),
            SourceSpec::Camera { device } => format!("camera:{}", device),
            SourceSpec::Subscription { topic } => format!("subscription:{}", topic),
        }
    }
}

/// An open video source
///
/// Modeled as tagged variants rather than a trait object: the set is
/// closed and the producer is the only consumer.
pub enum VideoSource {
    Files(FileSequenceSource),
    Camera(CameraSource),
    Subscriber(SubscriberSource),
}

impl VideoSource {
    /// Open the source described by `spec`.
    ///
    /// A returned source is live: file sets are fully preloaded, and
    /// subprocess-backed sources have their child running and their reader
    /// attached. Parameter-set discovery is the producer's job.
    pub async fn open(spec: &SourceSpec, config: &StreamConfig) -> Result<Self, SourceError> {
        match spec {
            SourceSpec::Files { dir } => {
                Ok(VideoSource::Files(FileSequenceSource::open(dir)?))
            }
            SourceSpec::Camera { device } => {
                Ok(VideoSource::Camera(CameraSource::open(device, config.fps)?))
            }
            SourceSpec::Subscription { topic } => Ok(VideoSource::Subscriber(
                SubscriberSource::open(topic, config).await?,
            )),
        }
    }

    /// Pull the next batch of NAL bodies.
    ///
    /// File sources return one file's worth per call (and loop forever);
    /// subprocess sources return whatever has accumulated, up to `max`
    /// units, or an empty batch when nothing is pending. `Err` means the
    /// source is dead and will not recover on its own.
    pub fn pull(&mut self, max: usize) -> Result<Vec<Bytes>, SourceError> {
        match self {
            VideoSource::Files(src) => Ok(src.next_file()),
            VideoSource::Camera(src) => src.pull(max),
            VideoSource::Subscriber(src) => src.pull(max),
        }
    }

    /// Shut the source down, reaping any subprocess
    pub async fn close(&mut self) {
        match self {
            VideoSource::Files(_) => {}
            VideoSource::Camera(src) => src.close().await,
            VideoSource::Subscriber(src) => src.close().await,
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            VideoSource::Files(src) => format!("files:{}", src.dir().display()),
            VideoSource::Camera(src) => format!("camera:{}", src.device()),
            VideoSource::Subscriber(src) => format!("subscription:{}", src.topic()),
        }
    }
}
