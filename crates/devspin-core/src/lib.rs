//! devspin のコアデータモデルと永続ストア

pub mod error;
pub mod model;
pub mod naming;
pub mod store;
pub mod tracker;

pub use error::*;
pub use model::*;
pub use naming::*;
pub use store::*;
pub use tracker::*;
