mod session;

pub use session::{ScanOutputs, ScanSession, ScanStatus, SlotImage};

pub const DEFAULT_SCALE_METERS: f64 = 0.24;
pub const DEFAULT_SLOTS_TOTAL: u32 = 24;
pub const TARGET_TYPE_DISH: &str = "dish";
