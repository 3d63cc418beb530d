pub mod config;
pub mod dag;
pub mod errors;
pub mod models;
pub mod traits;
pub mod utils;

pub use config::*;
pub use dag::{Dag, DagNode};
pub use errors::*;
pub use models::*;
pub use traits::*;
