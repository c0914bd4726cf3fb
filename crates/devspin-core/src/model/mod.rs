//! モデル定義
//!
//! プロセスレコードとコンテナサービス定義を機能ごとに分離しています。

mod duration;
mod record;
mod service;

pub use duration::*;
pub use record::*;
pub use service::*;
