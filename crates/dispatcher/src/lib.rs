//! 调度引擎
//!
//! - [`calculator`] - 各调度类型的下次触发时间计算
//! - [`meta_task`] - 元任务调度器与内置元任务
//! - [`cluster`] - 调度节点成员与槽位分配
//! - [`strategy`] - 计划、作业实例与任务的编排状态机
//! - [`strategies`] - Worker选择策略
//! - [`task_dispatcher`] - 任务下发与重试
//! - [`broker`] - 调度节点装配

pub mod broker;
pub mod calculator;
pub mod cluster;
mod lock;
pub mod meta_task;
pub mod plan_service;
pub mod processor;
pub mod strategies;
pub mod strategy;
pub mod task_dispatcher;
pub mod task_factory;


pub use broker::{Broker, BrokerDependencies};
pub use calculator::{ScheduleCalculator, ScheduleCalculatorFactory, ScheduleState};
pub use cluster::{slot_of, NodeManager, SlotManager};
pub use meta_task::{MetaTask, MetaTaskScheduler, MetaTaskType};
pub use plan_service::PlanService;
pub use processor::SchedulerProcessor;
pub use strategies::{SelectContext, WorkerSelector, WorkerSelectorFactory};
pub use strategy::{Repositories, ScheduleStrategy};
pub use task_dispatcher::{DispatchOutcome, TaskDispatcher};
pub use task_factory::{TaskCreateContext, TaskFactory};
