//! Pure data structures shared by the registry, the initialization engine and the health monitor.

pub mod policy;
pub mod record;
pub mod status;

pub use policy::*;
pub use record::*;
pub use status::*;
