//! Concrete storage pieces: the payload cipher, the encrypting store adapter,
//! a JSON-file backend, and providers for cipher key material.

pub mod cipher;
pub mod encrypted_store;
pub mod file_store;
pub mod key_provider;
