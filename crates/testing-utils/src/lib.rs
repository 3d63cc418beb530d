//! # Scheduler Testing Utils
//!
//! 工作区共享的测试工具：
//!
//! - **Builders**: 计划、作业、Worker 的测试数据构建器
//! - **Mocks**: 可编排应答的 `WorkerRpc` 替身，记录每次下发
//! - **Helpers**: 异步条件轮询等常用等待逻辑
//!
//! 作为 dev-dependency 引入：
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
