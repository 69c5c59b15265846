pub mod config;
pub mod error;
pub mod notify;
pub mod remote;
pub mod scan;
pub mod tasks;
pub mod testing;

pub mod prelude {
    pub use crate::config::ScannerConfig;
    pub use crate::error::{Result, ScanError};
    pub use crate::scan::{PackageRef, PackageResult, ScanConfig, Vulnerability};
    pub use crate::tasks::{ScanEvent, ScanOrchestrator, ScanRequest, ScanTask, TaskStatus};
}
