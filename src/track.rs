//! Shared video track
//!
//! One H.264 track exists per process. Every peer connection attaches it
//! as a sender, and the WebRTC stack fans identical RTP out to all of
//! them. Writes are serialized through a single channel drained by one
//! writer task, so the producer never races itself on the track.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Samples queued between producer and track writer
const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// H.264 payload type registered with the media engine
pub const H264_PAYLOAD_TYPE: u8 = 102;

/// Codec parameters negotiated for the shared track: baseline 3.1,
/// packetization-mode 1, 90 kHz clock
pub fn h264_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: 90_000,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f"
            .to_owned(),
        rtcp_feedback: vec![],
    }
}

/// Create the process-wide H.264 track
pub fn new_video_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        h264_codec_capability(),
        "video".to_owned(),
        "rmcs-stream".to_owned(),
    ))
}

/// One Annex-B access unit headed for the track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Bytes,
    pub duration: Duration,
}

/// Serialized write access to the shared track
#[derive(Clone)]
pub struct TrackWriter {
    tx: mpsc::Sender<MediaSample>,
}

impl TrackWriter {
    /// Spawn the writer task draining into `track`
    pub fn spawn(track: Arc<TrackLocalStaticSample>, stop: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<MediaSample>(SAMPLE_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                let sample = tokio::select! {
                    _ = stop.cancelled() => break,
                    sample = rx.recv() => match sample {
                        Some(sample) => sample,
                        None => break,
                    },
                };

                let sample = Sample {
                    data: sample.data,
                    duration: sample.duration,
                    ..Default::default()
                };

                // A failed write means a peer tore down mid-sample; the
                // session lifecycle handles that elsewhere.
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::debug!(error = %e, "Track write ignored");
                }
            }
        });

        Self { tx }
    }

    /// Build a writer backed by a plain channel, exposing the receiver.
    /// Used by tests to observe exactly what the producer emits.
    pub fn channel() -> (Self, mpsc::Receiver<MediaSample>) {
        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Queue one sample; drops it if the writer is gone
    pub async fn write(&self, sample: MediaSample) {
        if self.tx.send(sample).await.is_err() {
            tracing::debug!("Sample dropped, track writer stopped");
        }
    }
}
