mod provider;
mod slots;
mod tracker;

pub use provider::{
    HeadingMonitor, HeadingProvider, HeadingSample, HeadingSubscription, SimulatedHeadingProvider,
};
pub use slots::{normalize_heading, shortest_delta_degrees, slot_for_heading};
pub use tracker::{HeadingState, HeadingTracker, DEFAULT_STABLE_RATE_THRESHOLD_DEG_PER_SEC};
