//! Password data model.
//!
//! UI 側には `PasswordEntry`（一覧表示用の軽量レコード）だけを渡し、
//! `Password` は選択されたときにワーカースレッド上で組み立てる想定です。

pub mod password;

pub use self::password::{Password, PasswordEntry, PasswordSummary};
