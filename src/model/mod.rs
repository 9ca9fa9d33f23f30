pub mod caller;
pub mod change_set;
pub mod common;
pub mod component;
pub mod document;
pub mod operation;
pub mod policy;
pub mod sync_config;

pub use caller::*;
pub use change_set::*;
pub use common::*;
pub use component::*;
pub use document::*;
pub use operation::*;
pub use policy::*;
pub use sync_config::*;
