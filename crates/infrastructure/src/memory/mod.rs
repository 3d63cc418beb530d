//! 内存存储实现
//!
//! 使用 `tokio::sync::RwLock` 保护的 `HashMap` 实现全部仓储与注册中心接口，
//! 适用于单节点部署和测试。条件更新在写锁内完成检查与修改，保证原子性。

mod instance;
mod plan;
mod registry;
mod task;

pub use instance::{InMemoryJobInstanceRepository, InMemoryPlanInstanceRepository};
pub use plan::InMemoryPlanRepository;
pub use registry::{InMemoryNodeRegistry, InMemoryWorkerRegistry, InMemoryWorkerStatistics};
pub use task::InMemoryTaskRepository;
