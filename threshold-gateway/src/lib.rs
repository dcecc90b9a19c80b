pub mod batching;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod log_event;
pub mod threshold;
pub mod threshold_set;
pub mod window_buffer;

pub(crate) mod human_duration;

pub use batching::{BatchConfig, Batcher, run_batcher};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::ConfigError;
pub use gateway::{Gateway, GatewayConfig};
pub use log_event::{Level, LogEvent, LogEventBuilder, LogFilter};
pub use threshold::{DetectorState, ThresholdDetector, ThresholdRule, ThresholdSettings, Trigger};
pub use threshold_set::ThresholdSet;
pub use window_buffer::{Placement, WindowBuffer};
