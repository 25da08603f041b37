//! Video producer
//!
//! The producer pulls NAL units from the active source, paces them at the
//! configured frame rate and writes Annex-B samples to the shared track.
//!
//! ```text
//!            ┌────────────────────────────────────────────┐
//!            │ VideoProducer                              │
//!   source ──┤  pending ── tick ── SEI stamp ── writer ───┼──► track
//!            │     │                  │                   │
//!            │  ParamCache (SPS/PPS/IDR)                  │
//!            └────────────────────────────────────────────┘
//! ```
//!
//! States:
//! - `Idle`: not emitting; no pacing task running.
//! - `Arming`: pacing, but holding all output until SPS and PPS have been
//!   seen from the source. On completion both are written (no SEI) and the
//!   state moves to `Running`.
//! - `Running`: per-NAL emission. Parameter sets refresh the cache and
//!   pass through bare; an IDR is preceded by the current SPS and PPS and
//!   carried as one `SEI ‖ IDR` sample; non-IDR slices are `SEI ‖ slice`;
//!   anything else passes through bare. At most one slice sample leaves
//!   per tick and the sample duration always equals the tick period.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::SourceError;
use crate::media::nal::{to_annex_b, NalUnitType};
use crate::media::sei::timestamp_sei;
use crate::source::{SourceSpec, VideoSource};
use crate::stats::PacingStats;
use crate::track::{MediaSample, TrackWriter};

/// NAL units pulled from a source per refill
const MAX_PULL: usize = 16;

/// Drift is logged every this many frames
const DRIFT_LOG_INTERVAL: u64 = 30;

/// Producer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Idle,
    Arming,
    Running,
}

/// Cached configuration NAL units for the active source
#[derive(Debug, Default)]
struct ParamCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    idr: Option<Bytes>,
}

impl ParamCache {
    fn armed(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn clear(&mut self) {
        self.sps = None;
        self.pps = None;
        self.idr = None;
    }
}

struct RunState {
    state: ProducerState,
    token: Option<CancellationToken>,
}

/// Paces NAL units from the active source onto the shared track
#[derive(Clone)]
pub struct VideoProducer {
    inner: Arc<Inner>,
}

struct Inner {
    writer: TrackWriter,
    tick: Duration,
    source: tokio::sync::RwLock<Option<VideoSource>>,
    cache: Mutex<ParamCache>,
    pending: Mutex<VecDeque<Bytes>>,
    run: Mutex<RunState>,
    last_sei_us: AtomicU64,
    stats: Mutex<PacingStats>,
}

impl VideoProducer {
    pub fn new(writer: TrackWriter, fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            inner: Arc::new(Inner {
                writer,
                tick: Duration::from_micros(1_000_000 / u64::from(fps)),
                source: tokio::sync::RwLock::new(None),
                cache: Mutex::new(ParamCache::default()),
                pending: Mutex::new(VecDeque::new()),
                run: Mutex::new(RunState { state: ProducerState::Idle, token: None }),
                last_sei_us: AtomicU64::new(0),
                stats: Mutex::new(PacingStats::new(fps)),
            }),
        }
    }

    pub fn state(&self) -> ProducerState {
        self.inner.run.lock().unwrap().state
    }

    /// Whether a source adapter is currently attached
    pub async fn has_source(&self) -> bool {
        self.inner.source.read().await.is_some()
    }

    /// Start pacing. Idempotent: a running producer stays untouched. Does
    /// nothing while no source is attached.
    pub async fn start(&self) {
        let has_source = self.inner.source.read().await.is_some();

        let token = {
            let mut run = self.inner.run.lock().unwrap();
            if run.token.is_some() {
                return;
            }
            if !has_source {
                tracing::warn!("Producer start requested without a source");
                return;
            }

            let token = CancellationToken::new();
            run.token = Some(token.clone());
            run.state = ProducerState::Arming;
            token
        };

        self.inner.stats.lock().unwrap().start();
        tracing::info!("Producer arming");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.pace_loop(token).await;
        });
    }

    /// Stop pacing. Idempotent.
    pub fn stop(&self) {
        let mut run = self.inner.run.lock().unwrap();
        if let Some(token) = run.token.take() {
            token.cancel();
            tracing::info!("Producer stopped");
        }
        run.state = ProducerState::Idle;
    }

    /// Replay the cached SPS, PPS and last IDR so a peer joining an
    /// already-running stream can decode without waiting for the next
    /// keyframe.
    pub async fn rearm(&self) {
        if self.state() != ProducerState::Running {
            return;
        }

        let (sps, pps, idr) = {
            let cache = self.inner.cache.lock().unwrap();
            (cache.sps.clone(), cache.pps.clone(), cache.idr.clone())
        };

        let (Some(sps), Some(pps)) = (sps, pps) else { return };

        tracing::debug!("Replaying configuration for late joiner");
        self.inner.emit_bare(sps).await;
        self.inner.emit_bare(pps).await;
        if let Some(idr) = idr {
            self.inner.emit_with_sei(idr).await;
        }
    }

    /// Switch to a new source atomically.
    ///
    /// The replacement is opened before the active source is touched;
    /// closing the old one happens after the swap, outside the lock. The
    /// parameter-set cache is invalidated so the next tick re-arms on the
    /// new source.
    pub async fn switch_source(
        &self,
        spec: &SourceSpec,
        config: &StreamConfig,
    ) -> Result<(), SourceError> {
        let new = VideoSource::open(spec, config).await?;

        let old = {
            let mut source = self.inner.source.write().await;
            source.replace(new)
        };
        if let Some(mut old) = old {
            old.close().await;
        }

        self.inner.cache.lock().unwrap().clear();
        self.inner.pending.lock().unwrap().clear();

        {
            let mut run = self.inner.run.lock().unwrap();
            if run.token.is_some() {
                run.state = ProducerState::Arming;
            }
        }

        tracing::info!(source = %spec.describe(), "Source switched");
        Ok(())
    }

    /// Close and detach the active source
    pub async fn shutdown(&self) {
        self.stop();
        let old = self.inner.source.write().await.take();
        if let Some(mut old) = old {
            old.close().await;
        }
        self.inner.cache.lock().unwrap().clear();
        self.inner.pending.lock().unwrap().clear();
    }
}

enum TickOutcome {
    Continue,
    SourceDead,
}

impl Inner {
    async fn pace_loop(self: Arc<Self>, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if matches!(self.tick_once().await, TickOutcome::SourceDead) {
                        self.enter_idle();
                        break;
                    }
                }
            }
        }
    }

    /// One pacing tick: refill the pending queue if needed, then process
    /// units until one slice sample has been emitted.
    async fn tick_once(&self) -> TickOutcome {
        if self.pending.lock().unwrap().is_empty() {
            let mut source = self.source.write().await;
            let Some(source) = source.as_mut() else {
                return TickOutcome::Continue;
            };

            match source.pull(MAX_PULL) {
                Ok(units) => {
                    self.pending.lock().unwrap().extend(units);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Source failed, producer going idle");
                    return TickOutcome::SourceDead;
                }
            }
        }

        let mut slice_sent = false;
        while !slice_sent {
            let unit = match self.pending.lock().unwrap().pop_front() {
                Some(unit) => unit,
                None => break,
            };
            slice_sent = self.process_unit(unit).await;
        }

        if slice_sent {
            let (frames, drift) = {
                let mut stats = self.stats.lock().unwrap();
                (stats.on_frame(), stats.drift_secs())
            };
            if frames % DRIFT_LOG_INTERVAL == 0 {
                tracing::debug!(frames = frames, drift_secs = drift, "Pacing");
            }
        }

        TickOutcome::Continue
    }

    /// Apply the emission rules to one NAL body. Returns true when a slice
    /// sample was written.
    async fn process_unit(&self, unit: Bytes) -> bool {
        let state = self.run.lock().unwrap().state;
        let nal_type = NalUnitType::of(&unit);

        match nal_type {
            Some(NalUnitType::Sps) => {
                self.cache.lock().unwrap().sps = Some(unit.clone());
                match state {
                    ProducerState::Running => self.emit_bare(unit).await,
                    _ => self.try_finish_arming().await,
                }
                false
            }
            Some(NalUnitType::Pps) => {
                self.cache.lock().unwrap().pps = Some(unit.clone());
                match state {
                    ProducerState::Running => self.emit_bare(unit).await,
                    _ => self.try_finish_arming().await,
                }
                false
            }
            Some(NalUnitType::Idr) => {
                self.cache.lock().unwrap().idr = Some(unit.clone());
                if state != ProducerState::Running {
                    return false;
                }

                let (sps, pps) = {
                    let cache = self.cache.lock().unwrap();
                    (cache.sps.clone(), cache.pps.clone())
                };
                if let Some(sps) = sps {
                    self.emit_bare(sps).await;
                }
                if let Some(pps) = pps {
                    self.emit_bare(pps).await;
                }
                self.emit_with_sei(unit).await;
                true
            }
            Some(NalUnitType::Slice) => {
                if state != ProducerState::Running {
                    return false;
                }
                self.emit_with_sei(unit).await;
                true
            }
            _ => {
                // SEI, AUD and anything unrecognized pass through bare.
                if state == ProducerState::Running {
                    self.emit_bare(unit).await;
                }
                false
            }
        }
    }

    /// In `Arming`, once SPS and PPS are both cached, emit them and move
    /// to `Running`.
    async fn try_finish_arming(&self) {
        let (sps, pps) = {
            let cache = self.cache.lock().unwrap();
            if !cache.armed() {
                return;
            }
            (cache.sps.clone().unwrap(), cache.pps.clone().unwrap())
        };

        {
            let mut run = self.run.lock().unwrap();
            if run.state != ProducerState::Arming {
                return;
            }
            run.state = ProducerState::Running;
        }

        tracing::info!("Producer running");
        self.emit_bare(sps).await;
        self.emit_bare(pps).await;
    }

    async fn emit_bare(&self, unit: Bytes) {
        let data = to_annex_b(&[unit]);
        self.writer.write(MediaSample { data, duration: self.tick }).await;
    }

    async fn emit_with_sei(&self, unit: Bytes) {
        let sei = timestamp_sei(self.next_timestamp_us());
        let data = to_annex_b(&[sei, unit]);
        self.writer.write(MediaSample { data, duration: self.tick }).await;
    }

    /// Wall-clock microseconds, clamped to be non-decreasing
    fn next_timestamp_us(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let prev = self.last_sei_us.fetch_max(now, Ordering::Relaxed);
        prev.max(now)
    }

    fn enter_idle(&self) {
        let mut run = self.run.lock().unwrap();
        if let Some(token) = run.token.take() {
            token.cancel();
        }
        run.state = ProducerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::nal::split_annex_b;
    use crate::media::sei::parse_timestamp_sei;
    use std::io::Write;
    use std::path::Path;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F];
    const PPS: &[u8] = &[0x68, 0xEF, 0x38];

    fn write_frame(dir: &Path, name: &str, units: &[&[u8]]) {
        let mut data = Vec::new();
        for u in units {
            data.extend_from_slice(&(u.len() as u32).to_be_bytes());
            data.extend_from_slice(u);
        }
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(&data).unwrap();
    }

    /// Directory with a config+IDR first frame and trailing P-frames
    fn sample_dir(idr_marker: u8) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "sample-0.h264", &[SPS, PPS, &[0x65, idr_marker]]);
        write_frame(dir.path(), "sample-1.h264", &[&[0x41, idr_marker, 0x01]]);
        write_frame(dir.path(), "sample-2.h264", &[&[0x41, idr_marker, 0x02]]);
        dir
    }

    async fn producer_with_dir(
        dir: &Path,
        fps: u32,
    ) -> (VideoProducer, mpsc::Receiver<MediaSample>, StreamConfig) {
        let (writer, rx) = TrackWriter::channel();
        let producer = VideoProducer::new(writer, fps);
        let config = StreamConfig::default().fps(fps);
        let spec = SourceSpec::Files { dir: dir.to_path_buf() };
        producer.switch_source(&spec, &config).await.unwrap();
        (producer, rx, config)
    }

    async fn next_sample(rx: &mut mpsc::Receiver<MediaSample>) -> MediaSample {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("sample in time")
            .expect("channel open")
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_precedes_slices() {
        let dir = sample_dir(0x88);
        let (producer, mut rx, _) = producer_with_dir(dir.path(), 30).await;
        producer.start().await;

        // SPS and PPS arrive first, bare.
        let sps = next_sample(&mut rx).await;
        assert_eq!(split_annex_b(&sps.data)[0].as_ref(), SPS);
        let pps = next_sample(&mut rx).await;
        assert_eq!(split_annex_b(&pps.data)[0].as_ref(), PPS);

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idr_sample_is_sei_then_idr() {
        let dir = sample_dir(0x88);
        let (producer, mut rx, _) = producer_with_dir(dir.path(), 30).await;
        producer.start().await;

        // Arming emits SPS, PPS; the IDR rule re-emits them again.
        let mut samples = Vec::new();
        for _ in 0..5 {
            samples.push(next_sample(&mut rx).await);
        }

        let idr_sample = &samples[4];
        let units = split_annex_b(&idr_sample.data);
        assert_eq!(units.len(), 2);
        assert!(parse_timestamp_sei(&units[0]).is_some());
        assert_eq!(units[1][0] & 0x1F, 5);

        // The two samples before it are the parameter sets, in order.
        assert_eq!(split_annex_b(&samples[2].data)[0].as_ref(), SPS);
        assert_eq!(split_annex_b(&samples[3].data)[0].as_ref(), PPS);

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slices_carry_monotonic_sei() {
        let dir = sample_dir(0x88);
        let (producer, mut rx, _) = producer_with_dir(dir.path(), 30).await;
        producer.start().await;

        let mut last_ts = 0u64;
        let mut slices_seen = 0;
        while slices_seen < 4 {
            let sample = next_sample(&mut rx).await;
            let units = split_annex_b(&sample.data);
            if let Some(ts) = parse_timestamp_sei(&units[0]) {
                assert!(ts >= last_ts, "SEI timestamps must not go backwards");
                last_ts = ts;
                slices_seen += 1;
            }
        }

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_duration_is_tick_period() {
        let dir = sample_dir(0x88);
        let (producer, mut rx, _) = producer_with_dir(dir.path(), 30).await;
        producer.start().await;

        let sample = next_sample(&mut rx).await;
        assert_eq!(sample.duration, Duration::from_micros(33_333));

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let dir = sample_dir(0x88);
        let (producer, mut rx, _) = producer_with_dir(dir.path(), 30).await;

        producer.start().await;
        producer.start().await;
        producer.start().await;

        // Exactly one pacing loop: the first two samples are the single
        // arming emission, not three of them.
        let first = next_sample(&mut rx).await;
        let second = next_sample(&mut rx).await;
        assert_eq!(split_annex_b(&first.data)[0].as_ref(), SPS);
        assert_eq!(split_annex_b(&second.data)[0].as_ref(), PPS);
        let third = next_sample(&mut rx).await;
        assert_ne!(split_annex_b(&third.data)[0].as_ref(), SPS);

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let dir = sample_dir(0x88);
        let (producer, _rx, _) = producer_with_dir(dir.path(), 30).await;

        producer.start().await;
        producer.stop();
        producer.stop();

        assert_eq!(producer.state(), ProducerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_source_stays_idle() {
        let (writer, _rx) = TrackWriter::channel();
        let producer = VideoProducer::new(writer, 30);

        producer.start().await;
        assert_eq!(producer.state(), ProducerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_rearms_on_new_source() {
        let dir_a = sample_dir(0xA0);
        let dir_b = sample_dir(0xB0);
        let (producer, mut rx, config) = producer_with_dir(dir_a.path(), 30).await;
        producer.start().await;

        // Run until a slice from A has been seen.
        loop {
            let sample = next_sample(&mut rx).await;
            let units = split_annex_b(&sample.data);
            if units.len() == 2 && units[1][0] & 0x1F == 1 {
                assert_eq!(units[1][1], 0xA0);
                break;
            }
        }

        let spec_b = SourceSpec::Files { dir: dir_b.path().to_path_buf() };
        producer.switch_source(&spec_b, &config).await.unwrap();

        // Drain anything queued before the swap, then expect the re-arm
        // sequence: SPS, PPS, then an IDR from B.
        let mut post_switch = Vec::new();
        loop {
            let sample = next_sample(&mut rx).await;
            let units = split_annex_b(&sample.data);
            let is_idr = units.len() == 2 && units[1][0] & 0x1F == 5;
            post_switch.push(units);
            if is_idr {
                break;
            }
        }

        let n = post_switch.len();
        assert!(n >= 3);
        assert_eq!(post_switch[n - 3][0].as_ref(), SPS);
        assert_eq!(post_switch[n - 2][0].as_ref(), PPS);
        assert_eq!(post_switch[n - 1][1][1], 0xB0);

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replays_cached_config() {
        let dir = sample_dir(0x88);
        let (producer, mut rx, _) = producer_with_dir(dir.path(), 30).await;
        producer.start().await;

        // Wait for the IDR so the whole cache is populated.
        loop {
            let sample = next_sample(&mut rx).await;
            let units = split_annex_b(&sample.data);
            if units.len() == 2 && units[1][0] & 0x1F == 5 {
                break;
            }
        }

        producer.rearm().await;

        // Collect the replay: SPS, PPS, SEI‖IDR must appear in order among
        // the subsequent samples.
        let mut replay = Vec::new();
        for _ in 0..8 {
            replay.push(split_annex_b(&next_sample(&mut rx).await.data));
        }
        let sps_at = replay.iter().position(|u| u[0].as_ref() == SPS).unwrap();
        assert_eq!(replay[sps_at + 1][0].as_ref(), PPS);
        assert_eq!(replay[sps_at + 2].last().unwrap()[0] & 0x1F, 5);

        producer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_goes_idle() {
        let (writer, _rx) = TrackWriter::channel();
        let producer = VideoProducer::new(writer, 30);

        // A camera source whose encoder has already gone away.
        let (nal_tx, nal_rx) = mpsc::channel(4);
        drop(nal_tx);
        {
            let mut source = producer.inner.source.write().await;
            *source = Some(VideoSource::Camera(
                crate::source::camera::CameraSource::from_parts("dead", nal_rx),
            ));
        }

        producer.start().await;

        // The first tick observes the dead source and idles the producer.
        timeout(Duration::from_secs(5), async {
            while producer.state() != ProducerState::Idle {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("producer should go idle");
    }
}
