//! devspin のプロセス管理
//!
//! tmux セッション上でコマンドを動かし、永続ストアと実体を照合して
//! 一覧・停止・アタッチを提供します。

pub mod handle;
pub mod log;
pub mod manager;
pub mod sampler;
pub mod session;

pub use handle::*;
pub use log::*;
pub use manager::*;
pub use sampler::*;
pub use session::*;
