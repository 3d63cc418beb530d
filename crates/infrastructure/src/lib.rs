//! 调度引擎外部协作方的默认实现
//!
//! - [`memory`] - 内存仓储与注册中心
//! - [`http_rpc`] - 基于HTTP的Worker调用

pub mod http_rpc;
pub mod memory;

pub use http_rpc::HttpWorkerRpc;
pub use memory::*;
