//! 扫描任务：状态机、存储、编排与过期清理
//!
//! | 模块 | 职责 |
//! |------|------|
//! | `task` | [`ScanTask`] 实体与状态转换 |
//! | `store` | [`TaskStore`]：活动 / 历史集合、持久化、快照广播 |
//! | `persistence` | [`TaskPersistence`] 后端（内存 / JSON 文件） |
//! | `orchestrator` | [`ScanOrchestrator`]：后台扫描循环与控制操作 |
//! | `sweeper` | [`ExpirySweeper`]：定时删除过期任务 |

mod orchestrator;
mod persistence;
mod store;
mod sweeper;
mod task;

pub use orchestrator::{
    OrchestratorSettings, ScanEvent, ScanOrchestrator, ScanOrchestratorBuilder, ScanRequest,
};
pub use persistence::{FileTaskPersistence, InMemoryPersistence, TaskPersistence};
pub use store::{STATE_VERSION, StoreSnapshot, TaskStats, TaskStore, TaskStoreState};
pub use sweeper::ExpirySweeper;
pub use task::{Progress, ScanTask, TaskStatus, estimate_minutes};
