//! Common utilities and types shared across regcoord

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, FetchConfig, MetaConfig, StoreBackend};
pub use error::{Error, Result};
pub use metrics::{NodeMetrics, METRICS};
pub use observer::Observable;
pub use utils::{duration_millis, parse_duration, timestamp_now_millis, to_millis, validate_id};
