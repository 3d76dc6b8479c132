//! Producer/consumer threads around a latest-sample slot.
//!
//! ```text
//!  ┌──────────── producer ────────────┐        ┌──────────── consumer ─────────────┐
//!  │ try_connect / read ─► PoseSample │──────► │ every tick_interval_ms:            │
//!  │ health ◄─ classify / errors      │ publish│   take() ─► Retargeter::tick       │
//!  └──────────────────────────────────┘  slot  │          ─► SkeletonHost commits   │
//!                                              │          ─► snapshot slot          │
//!                                              └────────────────────────────────────┘
//! ```
//!
//! The slot holds at most one sample: a new one replaces an unconsumed one.
//! Locks are held only for the copy in or out, never across decode or IK.
//! Only the consumer thread touches the [`Retargeter`]; other threads read
//! the pose through [`Pipeline::latest_pose`].
//!
//! The producer drives the channel on its own current-thread tokio runtime.
//! Every wait it makes (connect backoff, frame read) races the stop signal,
//! so shutdown always joins it and the channel is closed when
//! [`Pipeline::shutdown`] returns.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::Instrument;

use crate::channel::{FrameDecoder, Transport};
use crate::retarget::Retargeter;
use crate::skeleton::{BoneBindings, PoseTable, SkeletonHost};
use crate::types::{ChannelHealth, PipelineConfig, PipelineStats, PoseSample};

/// A retarget tick slower than this is logged.
const SLOW_TICK: Duration = Duration::from_millis(5);
/// Granularity of the consumer's interruptible sleeps.
const STOP_POLL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Shared cells
// ---------------------------------------------------------------------------

/// One-slot, latest-wins sample buffer.
#[derive(Debug, Default)]
pub struct SampleSlot {
    latest: Mutex<Option<PoseSample>>,
    overwritten: AtomicU64,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample`. Returns `true` if an unconsumed sample was replaced.
    pub fn publish(&self, sample: PoseSample) -> bool {
        let replaced = self.latest.lock().replace(sample).is_some();
        if replaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    /// Take the pending sample, if any.
    pub fn take(&self) -> Option<PoseSample> {
        self.latest.lock().take()
    }

    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// [`ChannelHealth`] readable from any thread.
#[derive(Debug)]
pub struct HealthCell(AtomicU8);

impl HealthCell {
    pub fn new(health: ChannelHealth) -> Self {
        Self(AtomicU8::new(health.status_code()))
    }

    pub fn get(&self) -> ChannelHealth {
        ChannelHealth::from_status_code(self.0.load(Ordering::Acquire))
    }

    /// Returns the previous value.
    pub fn set(&self, health: ChannelHealth) -> ChannelHealth {
        ChannelHealth::from_status_code(self.0.swap(health.status_code(), Ordering::AcqRel))
    }
}

impl Default for HealthCell {
    fn default() -> Self {
        Self::new(ChannelHealth::Disconnected)
    }
}

/// Pose table as of a given productive tick.
#[derive(Debug, Clone, Copy)]
pub struct PoseSnapshot {
    pub tick: u64,
    pub table: PoseTable,
}

#[derive(Debug, Default)]
struct Counters {
    frames_decoded: AtomicU64,
    invalid_samples: AtomicU64,
    reconnect_attempts: AtomicU64,
    consumer_ticks: AtomicU64,
    idle_ticks: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    stop: watch::Sender<bool>,
    recalibrate: AtomicBool,
    slot: SampleSlot,
    snapshot: Mutex<Option<PoseSnapshot>>,
    health: HealthCell,
    counters: Counters,
}

impl Shared {
    fn new() -> Self {
        Self {
            stop: watch::channel(false).0,
            recalibrate: AtomicBool::new(false),
            slot: SampleSlot::new(),
            snapshot: Mutex::new(None),
            health: HealthCell::default(),
            counters: Counters::default(),
        }
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    fn raise_stop(&self) {
        self.stop.send_replace(true);
    }

    /// Sleep for `total`, waking early when stop is raised.
    fn sleep(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames_decoded: c.frames_decoded.load(Ordering::Relaxed),
            samples_overwritten: self.slot.overwritten(),
            invalid_samples: c.invalid_samples.load(Ordering::Relaxed),
            reconnect_attempts: c.reconnect_attempts.load(Ordering::Relaxed),
            consumer_ticks: c.consumer_ticks.load(Ordering::Relaxed),
            idle_ticks: c.idle_ticks.load(Ordering::Relaxed),
            health: self.health.get(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What [`Pipeline::shutdown`] hands back.
pub struct PipelineOutcome<H> {
    pub stats: PipelineStats,
    pub retargeter: Retargeter,
    pub host: H,
}

/// Running producer + consumer pair.
///
/// Dropping the pipeline stops both threads; [`shutdown`](Self::shutdown)
/// does the same and returns the consumer's state.
pub struct Pipeline<H> {
    shared: Arc<Shared>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<(Retargeter, H)>>,
}

impl<H> Pipeline<H>
where
    H: SkeletonHost + Send + 'static,
{
    pub fn spawn<T>(
        config: PipelineConfig,
        decoder: FrameDecoder<T>,
        retargeter: Retargeter,
        host: H,
    ) -> Result<Self>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let shared = Arc::new(Shared::new());

        let producer = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("pose-producer".into())
                .spawn(move || {
                    // Built here so it is never dropped inside a caller's runtime.
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(err) => {
                            error!("producer runtime failed to start: {err}");
                            return;
                        }
                    };
                    let span = tracing::info_span!("producer", pipe = %config.pipe_name);
                    runtime.block_on(run_producer(&shared, &config, decoder).instrument(span));
                })
                .context("spawning producer thread")?
        };

        let consumer = {
            let shared = shared.clone();
            let interval = Duration::from_millis(config.tick_interval_ms);
            thread::Builder::new()
                .name("pose-consumer".into())
                .spawn(move || run_consumer(&shared, interval, retargeter, host))
                .context("spawning consumer thread")?
        };

        info!(
            "pipeline started (pipe '{}', tick {} ms)",
            config.pipe_name, config.tick_interval_ms
        );

        Ok(Self {
            shared,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    pub fn health(&self) -> ChannelHealth {
        self.shared.health.get()
    }

    /// Copy of the pose table after the most recent productive tick.
    pub fn latest_pose(&self) -> Option<PoseSnapshot> {
        *self.shared.snapshot.lock()
    }

    /// Recalibrate from the next sample the consumer takes.
    pub fn request_recalibration(&self) {
        self.shared.recalibrate.store(true, Ordering::Release);
    }

    /// Stop both loops, join them and return the consumer's state. The
    /// channel is closed by the time this returns.
    pub fn shutdown(mut self) -> Result<PipelineOutcome<H>> {
        self.shared.raise_stop();

        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| anyhow!("consumer already joined"))?;
        let (retargeter, host) = consumer
            .join()
            .map_err(|_| anyhow!("consumer thread panicked"))?;

        if let Some(producer) = self.producer.take() {
            producer
                .join()
                .map_err(|_| anyhow!("producer thread panicked"))?;
        }

        let stats = self.shared.stats();
        info!("pipeline stopped: {} frames decoded", stats.frames_decoded);
        Ok(PipelineOutcome {
            stats,
            retargeter,
            host,
        })
    }
}

impl<H> Drop for Pipeline<H> {
    fn drop(&mut self) {
        self.shared.raise_stop();
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                warn!("consumer thread panicked");
            }
        }
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                warn!("producer thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Resolves once stop is raised.
async fn stop_raised(stop: &mut watch::Receiver<bool>) {
    // The sender lives in `Shared`, which outlives this receiver.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Sleep for `delay`. Returns `true` if stop was raised first.
async fn stopped_during(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = stop_raised(stop) => true,
    }
}

async fn run_producer<T: Transport>(shared: &Shared, config: &PipelineConfig, mut decoder: FrameDecoder<T>) {
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
    let backoff = Duration::from_millis(config.disconnect_backoff_ms);
    let counters = &shared.counters;
    let mut stop = shared.stop.subscribe();

    while !shared.stopping() {
        if !decoder.is_connected() {
            counters.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            if !decoder.try_connect() {
                if stopped_during(&mut stop, reconnect_delay).await {
                    break;
                }
                continue;
            }
            shared.health.set(ChannelHealth::Connected);
        }

        let result = tokio::select! {
            result = decoder.read() => result,
            _ = stop_raised(&mut stop) => break,
        };

        match result {
            Ok(sample) => {
                shared.health.set(decoder.classify(&sample));
                if !sample.is_valid() {
                    counters.invalid_samples.fetch_add(1, Ordering::Relaxed);
                }
                shared.slot.publish(sample);
                counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if err.requires_reconnect() => {
                warn!("{err}; reconnecting");
                decoder.disconnect();
                shared.health.set(ChannelHealth::Disconnected);
                if stopped_during(&mut stop, backoff).await {
                    break;
                }
            }
            Err(err) => {
                debug!("{err}");
                shared.health.set(ChannelHealth::VersionMismatch);
            }
        }
    }

    decoder.disconnect();
    shared.health.set(ChannelHealth::Disconnected);
    debug!("producer exiting");
}

fn run_consumer<H: SkeletonHost>(
    shared: &Shared,
    interval: Duration,
    mut retargeter: Retargeter,
    mut host: H,
) -> (Retargeter, H) {
    let span = tracing::info_span!("consumer");
    let _enter = span.enter();

    let mut bindings = BoneBindings::<H::Handle>::new();
    let counters = &shared.counters;
    let mut next = Instant::now();

    while !shared.stopping() {
        next += interval;
        counters.consumer_ticks.fetch_add(1, Ordering::Relaxed);

        if shared.recalibrate.swap(false, Ordering::AcqRel) {
            retargeter.request_recalibration();
        }

        // Lock held only for the copy out.
        match shared.slot.take() {
            Some(sample) => {
                let started = Instant::now();
                let report = retargeter.tick(&sample);
                retargeter.apply_to_host(&mut host, &mut bindings);
                *shared.snapshot.lock() = Some(PoseSnapshot {
                    tick: report.tick,
                    table: *retargeter.table(),
                });

                let elapsed = started.elapsed();
                if elapsed > SLOW_TICK {
                    warn!("retarget tick {} took {:?}", report.tick, elapsed);
                }
            }
            None => {
                counters.idle_ticks.fetch_add(1, Ordering::Relaxed);
            }
        }

        let now = Instant::now();
        if now < next {
            shared.sleep(next - now);
        } else {
            next = now;
        }
    }

    debug!("consumer exiting after {} productive ticks", retargeter.tick_count());
    (retargeter, host)
}
