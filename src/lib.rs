pub mod api;
pub mod capture;
pub mod config;
pub mod heading;
pub mod models;
pub mod pipeline;
pub mod store;

pub use api::{ApiClient, ApiConfig, ScanBackend};
pub use capture::{AutoCaptureController, CaptureConfig, CaptureFeedback, PhotoSource};
pub use heading::{HeadingMonitor, HeadingProvider, SimulatedHeadingProvider};
pub use models::{ScanSession, ScanStatus, SlotImage};
pub use pipeline::{OrchestratorConfig, PipelineError, RunOutcome, UploadOrchestrator};
pub use store::{Database, ImageVault};
