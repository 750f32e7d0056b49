// Scheduler module: staleness detection, dispatch and the polling loop

pub mod clock;
pub mod detector;
pub mod dispatcher;
pub mod engine;

pub use crate::config::CadenceMode;
pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::StalenessDetector;
pub use dispatcher::Dispatcher;
pub use engine::{ScanScheduler, SchedulerConfig, ShutdownHandle};
