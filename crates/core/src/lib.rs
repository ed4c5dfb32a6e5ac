pub mod collab;
pub mod config;
pub mod error;
pub mod path;
pub mod sample;

pub use collab::{Clock, NullTimerDriver, OutputSink, SystemClock, TimerDriver};
pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use sample::{DataSample, DataType};
