//! gtkpass-core
//!
//! Core building blocks for the GTKPass desktop client.
//!
//! # モジュール構成
//! - **runner**: TaskRunner（bounded worker pool + scope guard + TaskHandle）
//! - **config**: RunnerConfig（デフォルト値・環境変数での上書き）
//! - **error**: エラー型（RunnerError, TaskError, ConfigError）
//! - **ids**: strongly-typed IDs（ULID ベース）
//! - **models**: パスワードのデータモデル（Password, PasswordEntry）
//! - **observability**: カウンタのスナップショットと tracing の初期化
//!
//! UI スレッドをブロックしうる処理（復号、ファイル I/O）は必ず
//! `TaskRunner` 経由でワーカースレッドに逃がすこと。
//!
//! ```ignore
//! let runner = TaskRunner::new(4)?;
//! let armed = runner.enter()?;
//! let handle = armed.submit(|| load_entries(&store))?;
//! let entries = handle.result(Some(Duration::from_secs(1)))?;
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod models;
pub mod observability;
pub mod runner;

pub use config::RunnerConfig;
pub use error::{ConfigError, RunnerError, TaskError};
pub use ids::TaskId;
pub use models::{Password, PasswordEntry, PasswordSummary};
pub use observability::RunnerCounts;
pub use runner::{ArmedRunner, TaskHandle, TaskRunner, TaskStatus};
