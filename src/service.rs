//! Process-level service wiring
//!
//! `StreamService` assembles the shared track, producer, peer registry
//! and signaling client, and owns their combined lifecycle. The C façade
//! and the standalone runner both sit on top of it.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::{Error, Result, SourceError};
use crate::producer::VideoProducer;
use crate::registry::PeerRegistry;
use crate::signaling::SignalingClient;
use crate::track::{new_video_track, TrackWriter};

/// The assembled streaming backend
pub struct StreamService {
    config: Arc<StreamConfig>,
    producer: VideoProducer,
    registry: Arc<PeerRegistry>,
    signaling: Mutex<Option<SignalingClient>>,
    writer_stop: CancellationToken,
}

impl StreamService {
    /// Bring the whole backend up: WebRTC plumbing, default source, then
    /// the broker connection.
    ///
    /// A default source that fails to load is logged and skipped; the
    /// service still starts and the next camera switch is the recovery.
    /// A broker that cannot be reached is fatal.
    pub async fn start(config: StreamConfig) -> Result<Self> {
        let config = Arc::new(config);

        let track = new_video_track();
        let writer_stop = CancellationToken::new();
        let writer = TrackWriter::spawn(Arc::clone(&track), writer_stop.child_token());

        let producer = VideoProducer::new(writer, config.fps);
        let registry = Arc::new(PeerRegistry::new(
            track,
            producer.clone(),
            config.stun_servers.clone(),
        )?);

        match config.source_spec(config.default_camera) {
            Some(spec) => {
                if let Err(e) = producer.switch_source(spec, &config).await {
                    tracing::error!(
                        camera = config.default_camera,
                        error = %e,
                        "Default camera failed to load"
                    );
                }
            }
            None => {
                tracing::warn!(camera = config.default_camera, "Default camera not in table");
            }
        }

        let signaling =
            SignalingClient::connect(Arc::clone(&config), Arc::clone(&registry), producer.clone())
                .await
                .map_err(Error::Signaling)?;

        tracing::info!(thing = %config.thing_name, "Streaming service started");

        Ok(Self {
            config,
            producer,
            registry,
            signaling: Mutex::new(Some(signaling)),
            writer_stop,
        })
    }

    /// Switch the active camera by table index
    pub async fn switch_source(&self, index: i32) -> Result<()> {
        let spec = self
            .config
            .source_spec(index)
            .cloned()
            .ok_or(Error::Source(SourceError::UnknownCamera(index)))?;

        self.producer
            .switch_source(&spec, &self.config)
            .await
            .map_err(Error::Source)
    }

    /// Tear everything down: announce departure on the broker, close the
    /// broker session, drop every peer, stop the producer.
    pub async fn stop(&self) {
        let signaling = self.signaling.lock().unwrap().take();
        if let Some(signaling) = signaling {
            signaling.shutdown().await;
        }

        self.registry.shutdown().await;
        self.producer.shutdown().await;
        self.writer_stop.cancel();

        tracing::info!("Streaming service stopped");
    }

    /// Whether the broker session is up
    pub fn is_running(&self) -> bool {
        self.signaling.lock().unwrap().is_some()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn producer(&self) -> &VideoProducer {
        &self.producer
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}
