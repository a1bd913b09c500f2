//! poscache-core
//!
//! 探索エンジン向けの局面キャッシュ（置換表）と、プロセスを跨いで結果を残す
//! 永続ハッシュ（persistent hash）の実装。
//!
//! - [`tt`]: ロックフリーな置換表とステージングテーブル
//! - [`phash`]: 永続ハッシュの契約・バックエンド・メンテナンス
//! - [`bridge`]: 探索終了時の書き出しと起動時の読み込み
//! - [`context`]: 上記を束ねるエンジンコンテキスト
//! - [`config`]: オプション設定（TOML）

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod phash;
pub mod tt;
pub mod types;

pub use config::CacheConfig;
pub use context::CacheContext;
pub use error::{PhashError, PhashResult};
pub use phash::{HashFileBackend, OpenMode, PersistentHash, PhashProbe, SearchState};
pub use tt::{StagingTable, TTData, TranspositionTable};
pub use types::{Bound, BoundFlags, Depth, Move, Value};
