pub mod app_config;
pub mod broker;
pub mod dispatcher;
pub mod meta_task;
pub mod observability;

pub use app_config::AppConfig;
pub use broker::BrokerConfig;
pub use dispatcher::DispatcherConfig;
pub use meta_task::MetaTaskConfig;
pub use observability::ObservabilityConfig;
