//! Frame-coalesced playback telemetry
//!
//! Time and progress notifications from the element arrive far more often
//! than a UI can use. Each kind gets a single pending slot; the first
//! notification schedules a flush one frame later and further notifications
//! before that flush are absorbed. A flush only emits when the value moved
//! past its epsilon. Play, pause and volume changes are forwarded at once.

use crate::events::EngineEvent;
use crate::media::{buffered_percent, MediaElement, MediaEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Minimum current-time change in seconds
pub const TIME_EPSILON: f64 = 0.05;
/// Minimum duration change in seconds
pub const DURATION_EPSILON: f64 = 0.01;
/// Minimum buffered change in percent
pub const BUFFERED_EPSILON: f64 = 0.25;

/// Receives coalesced events
pub type TelemetrySink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

#[derive(Default)]
struct Pending {
    time: bool,
    progress: bool,
}

#[derive(Default)]
struct LastEmitted {
    time: Option<f64>,
    duration: Option<f64>,
    buffered: Option<f64>,
}

fn moved(last: Option<f64>, value: f64, epsilon: f64) -> bool {
    last.map_or(true, |last| (value - last).abs() >= epsilon)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Running telemetry task for one element
pub struct TelemetryPump {
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryPump {
    /// Start forwarding the element's events to `sink`
    pub fn spawn(element: Arc<dyn MediaElement>, frame: Duration, sink: TelemetrySink) -> Self {
        let shutdown = CancellationToken::new();
        // Subscribe here so events emitted right after spawn are seen.
        let events = element.subscribe();
        let task = tokio::spawn(run(element, events, frame, sink, shutdown.clone()));
        Self {
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Cancel any pending flush and stop listening
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for TelemetryPump {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    element: Arc<dyn MediaElement>,
    mut events: broadcast::Receiver<MediaEvent>,
    frame_interval: Duration,
    sink: TelemetrySink,
    shutdown: CancellationToken,
) {
    let mut pending = Pending::default();
    let mut last = LastEmitted::default();
    let frame = sleep(frame_interval);
    tokio::pin!(frame);
    let mut scheduled = false;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            () = &mut frame, if scheduled => {
                scheduled = false;
                flush(element.as_ref(), &mut pending, &mut last, &sink);
            }
            event = events.recv() => {
                match event {
                    Ok(MediaEvent::Play) => sink(EngineEvent::Play),
                    Ok(MediaEvent::Pause) => sink(EngineEvent::Pause),
                    Ok(MediaEvent::VolumeChange) => sink(EngineEvent::VolumeChange {
                        volume: element.volume(),
                        muted: element.muted(),
                    }),
                    Ok(MediaEvent::TimeUpdate) | Ok(MediaEvent::DurationChange) => pending.time = true,
                    Ok(MediaEvent::Progress) => pending.progress = true,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Telemetry lagged behind media events");
                        pending.time = true;
                        pending.progress = true;
                    }
                    Err(RecvError::Closed) => break,
                }
                if !scheduled && (pending.time || pending.progress) {
                    frame.as_mut().reset(Instant::now() + frame_interval);
                    scheduled = true;
                }
            }
        }
    }
}

fn flush(
    element: &dyn MediaElement,
    pending: &mut Pending,
    last: &mut LastEmitted,
    sink: &TelemetrySink,
) {
    if std::mem::take(&mut pending.time) {
        let current_time = finite_or_zero(element.current_time());
        let duration = finite_or_zero(element.duration());
        if moved(last.time, current_time, TIME_EPSILON)
            || moved(last.duration, duration, DURATION_EPSILON)
        {
            last.time = Some(current_time);
            last.duration = Some(duration);
            sink(EngineEvent::TimeUpdate {
                current_time,
                duration,
            });
        }
    }

    if std::mem::take(&mut pending.progress) {
        let buffered = buffered_percent(element);
        if moved(last.buffered, buffered, BUFFERED_EPSILON) {
            last.buffered = Some(buffered);
            sink(EngineEvent::Progress {
                buffered_percent: buffered,
            });
        }
    }
}
