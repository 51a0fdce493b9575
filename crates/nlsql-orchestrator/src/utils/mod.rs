//! Utilities module - text helpers shared by the context engine and gateway

pub mod text_utils;

pub use text_utils::TextUtils;
