use std::time::Instant;

use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::slots::normalize_heading;
use super::tracker::{HeadingState, HeadingTracker};

/// Raw orientation reading. Ephemeral, produced at sensor rate.
#[derive(Debug, Clone, Copy)]
pub struct HeadingSample {
    pub heading: f64,
    pub timestamp: Instant,
}

/// Source of heading samples. Implementations spawn their own producer task
/// and must stop delivering callbacks once the returned subscription is
/// stopped. Must be called from within a tokio runtime.
pub trait HeadingProvider: Send + Sync {
    fn start(&self, on_sample: Box<dyn FnMut(HeadingSample) + Send>) -> HeadingSubscription;
}

/// Handle for a running sample producer. `stop` consumes the handle, so it
/// can only be invoked once; it joins the producer task, guaranteeing no
/// further callbacks after it returns.
pub struct HeadingSubscription {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeadingSubscription {
    pub fn new(cancel_token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            cancel_token,
            handle,
        }
    }

    pub async fn stop(self) {
        self.cancel_token.cancel();
        let _ = self.handle.await;
    }
}

/// Deterministic stand-in for a real compass: rotates at roughly 18 deg/s
/// with a sinusoidal wobble, sampled at 100 ms. Used by the demo binary and
/// integration tests.
pub struct SimulatedHeadingProvider {
    sample_interval: Duration,
    base_rate_deg_per_sec: f64,
}

impl SimulatedHeadingProvider {
    pub fn new(sample_interval: Duration, base_rate_deg_per_sec: f64) -> Self {
        Self {
            sample_interval,
            base_rate_deg_per_sec,
        }
    }
}

impl Default for SimulatedHeadingProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 18.0)
    }
}

impl HeadingProvider for SimulatedHeadingProvider {
    fn start(&self, mut on_sample: Box<dyn FnMut(HeadingSample) + Send>) -> HeadingSubscription {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let sample_interval = self.sample_interval;
        let base_rate = self.base_rate_deg_per_sec;

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut previous_tick = started;
            let mut heading = 0.0_f64;
            let mut ticker = tokio::time::interval(sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let dt_secs = now
                            .saturating_duration_since(previous_tick)
                            .as_secs_f64()
                            .max(0.016);
                        previous_tick = now;

                        let t = started.elapsed().as_secs_f64();
                        let wobble = ((t / 0.7).sin() + (t / 0.23).sin()) * 0.5;
                        let rate = base_rate + wobble * 10.0;
                        heading = normalize_heading(heading + rate * dt_secs);

                        on_sample(HeadingSample { heading, timestamp: now });
                    }
                    _ = token.cancelled() => {
                        info!("simulated heading provider shutting down");
                        break;
                    }
                }
            }
        });

        HeadingSubscription::new(cancel_token, handle)
    }
}

/// Couples a provider with a tracker and fans derived state out on a watch
/// channel so consumers always see the latest reading without backpressure.
pub struct HeadingMonitor {
    subscription: Option<HeadingSubscription>,
    state_rx: watch::Receiver<HeadingState>,
}

impl HeadingMonitor {
    pub fn start(provider: &dyn HeadingProvider, stable_rate_threshold_deg_per_sec: f64) -> Self {
        let (state_tx, state_rx) = watch::channel(HeadingState::default());
        let mut tracker = HeadingTracker::new(stable_rate_threshold_deg_per_sec);

        let subscription = provider.start(Box::new(move |sample| {
            let state = tracker.observe(sample.heading, sample.timestamp);
            let _ = state_tx.send(state);
        }));

        Self {
            subscription: Some(subscription),
            state_rx,
        }
    }

    pub fn state(&self) -> watch::Receiver<HeadingState> {
        self.state_rx.clone()
    }

    pub async fn stop(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.stop().await;
        }
    }
}
