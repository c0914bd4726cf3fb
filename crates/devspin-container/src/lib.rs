pub mod converter;
pub mod docker;
pub mod error;
pub mod port;
pub mod registry;
pub mod runtime;
pub mod stats;
pub mod waiter;

pub use converter::*;
pub use docker::*;
pub use error::*;
pub use port::*;
pub use registry::*;
pub use runtime::*;
pub use stats::*;
pub use waiter::*;
