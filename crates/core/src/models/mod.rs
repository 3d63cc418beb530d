//! # 数据模型
//!
//! 调度引擎使用的核心数据结构：
//!
//! - [`Plan`] / [`PlanInfo`] - 计划及其不可变的版本快照
//! - [`PlanInstance`] - 计划的一次触发
//! - [`JobInstance`] - DAG节点在一次触发中的执行
//! - [`Task`] - 下发给Worker的最小执行单元
//! - [`Worker`] - 执行端节点的只读快照
//! - [`BrokerNode`] - 调度集群中的节点
//!
//! ## 状态流转
//!
//! ```text
//! PlanInstance: SCHEDULING → EXECUTING → SUCCEED / FAILED
//! JobInstance:  SCHEDULING → EXECUTING → SUCCEED / FAILED
//! Task:         SCHEDULING → DISPATCHING → EXECUTING → SUCCEED / FAILED
//! Worker:       RUNNING → FUSING → TERMINATED，心跳恢复时 FUSING → RUNNING
//! ```

pub mod instance;
pub mod node;
pub mod plan;
pub mod schedule;
pub mod task;
pub mod worker;

pub use instance::*;
pub use node::*;
pub use plan::*;
pub use schedule::*;
pub use task::*;
pub use worker::*;

/// 键值属性，贯穿计划实例、作业实例与任务
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// 将 `source` 合并进 `target`，同名键以 `source` 为准
pub fn merge_attributes(target: &mut Attributes, source: &Attributes) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// 合并多个属性集合，后者覆盖前者
pub fn merged(layers: &[&Attributes]) -> Attributes {
    let mut result = Attributes::new();
    for layer in layers {
        merge_attributes(&mut result, layer);
    }
    result
}
