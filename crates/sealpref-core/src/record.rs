//! Versioned records and their load/save lifecycle.
//!
//! A record is any serde type implementing [`Record`]. It is persisted as a
//! JSON object carrying an extra integer [`VERSION_FIELD`]. The lifecycle is
//! three explicit functions instead of serializer callbacks:
//!
//! - [`create`]: no payload was found; `on_init` runs once.
//! - [`decode`]: payload found; a stored version different from
//!   [`Record::VERSION`] runs `on_change_version(old)` once, then
//!   `on_deserialize` runs.
//! - [`encode`]: `on_serialize` runs, then the current version is stamped.

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::key::{KeyDeclaration, KeyDomain};

/// Name of the version field embedded in every encoded record.
pub const VERSION_FIELD: &str = "version";

/// Errors produced while resolving, decoding or encoding a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The record type declares no storage key at all.
    #[error("record type {record} declares no storage key")]
    MissingKeyDeclaration { record: &'static str },
    /// The record type declares keys, but none in the store's key domain.
    #[error("record type {record} has no key in domain {expected} (declared: {declared})")]
    KeyDomainMismatch {
        record: &'static str,
        expected: &'static str,
        declared: String,
    },
    /// The stored payload could not be decoded into the record type.
    #[error("failed to decode {record}: {reason}")]
    DecodeFailure { record: &'static str, reason: String },
    /// The record could not be encoded to text.
    #[error("failed to encode {record}: {reason}")]
    EncodeFailure { record: &'static str, reason: String },
}

/// A structured value persisted under a declared key, with schema versioning.
///
/// Fields added in later versions should be tolerated by old payloads, so
/// record types normally carry `#[serde(default)]`. The field name
/// [`VERSION_FIELD`] is reserved.
pub trait Record: Serialize + DeserializeOwned + Default {
    /// Current schema version. Bump it on incompatible changes to receive
    /// `on_change_version` for payloads written by older versions.
    const VERSION: u32 = 1;

    /// Storage keys of this type, at most one per key domain.
    fn key_declarations() -> Vec<KeyDeclaration> {
        Vec::new()
    }

    /// Runs once when no stored payload exists and a fresh value is created.
    fn on_init(&mut self) {}

    /// Runs when the stored version differs from [`Record::VERSION`].
    fn on_change_version(&mut self, _old_version: u32) {}

    /// Runs after every decode, following any version change.
    fn on_deserialize(&mut self) {}

    /// Runs right before the version is stamped and the value encoded.
    fn on_serialize(&mut self) {}
}

/// Anything a [`Tracked`] record can be written back to.
pub trait RecordWriter {
    type Error;

    /// Register the record's current state under its key.
    fn set_record<R: Record>(&self, record: &mut Tracked<R>) -> Result<(), Self::Error>;

    /// Make pending writes durable.
    fn flush(&self) -> Result<(), Self::Error>;
}

/// How a tracked record came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// No payload existed; the value was created and initialized.
    Created,
    /// The value was decoded from a stored payload.
    Loaded,
}

/// A record value together with the version it was stored under.
///
/// Dereferences to the record, so fields and methods are used directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<R> {
    value: R,
    stored_version: u32,
    origin: Origin,
}

impl<R: Record> Tracked<R> {
    pub fn stored_version(&self) -> u32 {
        self.stored_version
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn into_inner(self) -> R {
        self.value
    }

    /// Push the current state back into `store`, flushing it when `persist`
    /// is set. Without `persist` the write is visible to later reads but not
    /// guaranteed durable.
    pub fn mark_dirty<W: RecordWriter>(&mut self, store: &W, persist: bool) -> Result<(), W::Error> {
        store.set_record(self)?;
        if persist {
            store.flush()?;
        }
        Ok(())
    }
}

impl<R> Deref for Tracked<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.value
    }
}

impl<R> DerefMut for Tracked<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.value
    }
}

/// Create a fresh record: default value, `on_init`, current version.
pub fn create<R: Record>() -> Tracked<R> {
    let mut value = R::default();
    value.on_init();
    Tracked {
        value,
        stored_version: R::VERSION,
        origin: Origin::Created,
    }
}

/// Decode a stored payload, running the version check and hooks.
pub fn decode<R: Record>(text: &str) -> Result<Tracked<R>, RecordError> {
    let mut fields = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => {
            return Err(decode_failure::<R>(format!(
                "expected an object, found {}",
                json_kind(&other)
            )))
        }
        Err(err) => return Err(decode_failure::<R>(err)),
    };

    let stored_version = take_version::<R>(&mut fields)?;
    let value: R =
        serde_json::from_value(Value::Object(fields)).map_err(decode_failure::<R>)?;

    let mut tracked = Tracked {
        value,
        stored_version,
        origin: Origin::Loaded,
    };
    if tracked.stored_version != R::VERSION {
        debug!(
            record = record_name::<R>(),
            from = tracked.stored_version,
            to = R::VERSION,
            "record version changed"
        );
        tracked.value.on_change_version(tracked.stored_version);
        tracked.stored_version = R::VERSION;
    }
    tracked.value.on_deserialize();
    Ok(tracked)
}

/// Encode a record to text, running `on_serialize` and stamping the version.
pub fn encode<R: Record>(record: &mut Tracked<R>) -> Result<String, RecordError> {
    record.value.on_serialize();
    record.stored_version = R::VERSION;

    let mut fields = match serde_json::to_value(&record.value).map_err(encode_failure::<R>)? {
        Value::Object(fields) => fields,
        other => {
            return Err(encode_failure::<R>(format!(
                "records must encode to an object, found {}",
                json_kind(&other)
            )))
        }
    };
    fields.insert(VERSION_FIELD.to_string(), Value::from(record.stored_version));
    serde_json::to_string(&Value::Object(fields)).map_err(encode_failure::<R>)
}

/// Find the key token `R` declares for domain `K`.
pub fn key_token<R: Record, K: KeyDomain>() -> Result<String, RecordError> {
    let declarations = R::key_declarations();
    if declarations.is_empty() {
        return Err(RecordError::MissingKeyDeclaration {
            record: record_name::<R>(),
        });
    }

    declarations
        .iter()
        .find(|decl| decl.domain() == K::DOMAIN)
        .map(|decl| decl.token().to_string())
        .ok_or_else(|| RecordError::KeyDomainMismatch {
            record: record_name::<R>(),
            expected: K::DOMAIN,
            declared: declarations
                .iter()
                .map(KeyDeclaration::domain)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Type name used in diagnostics only; never part of a stored key.
pub fn record_name<R>() -> &'static str {
    std::any::type_name::<R>()
}

fn take_version<R>(fields: &mut Map<String, Value>) -> Result<u32, RecordError> {
    match fields.remove(VERSION_FIELD) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| decode_failure::<R>(format!("invalid version {number}"))),
        Some(other) => Err(decode_failure::<R>(format!(
            "version must be a number, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn decode_failure<R>(reason: impl fmt::Display) -> RecordError {
    RecordError::DecodeFailure {
        record: record_name::<R>(),
        reason: reason.to_string(),
    }
}

fn encode_failure<R>(reason: impl fmt::Display) -> RecordError {
    RecordError::EncodeFailure {
        record: record_name::<R>(),
        reason: reason.to_string(),
    }
}
