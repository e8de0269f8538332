pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use clock::{duration_from_secs, Clock, ManualClock, SystemClock};
pub use config::ConciergeConfig;
pub use error::{ConciergeError, Result};
pub use types::*;
