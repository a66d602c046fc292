//! Core abstractions for sealpref: the key-value store contract, key domains,
//! and the versioned record lifecycle.
//! This crate carries no cryptography so backends can depend on it cheaply.

pub mod key;
pub mod record;
pub mod storage;
