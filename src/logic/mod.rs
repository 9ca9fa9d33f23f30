pub mod classify;
pub mod components;
pub mod export;
pub mod fetch;
pub mod fingerprint;
pub mod operations;
pub mod parse;
pub mod reconcile;
pub mod root_merge;
pub mod sinks;
pub mod sync;

pub use classify::*;
pub use components::*;
pub use export::*;
pub use fetch::*;
pub use fingerprint::*;
pub use operations::*;
pub use parse::*;
pub use reconcile::*;
pub use root_merge::*;
pub use sinks::*;
pub use sync::*;
