pub mod registry;
pub mod repository;
pub mod rpc;

pub use registry::*;
pub use repository::*;
pub use rpc::*;
