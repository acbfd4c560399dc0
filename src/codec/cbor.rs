//! Self-describing payload encoding via CBOR.
//!
//! Everything persisted derives serde, so the whole codec reduces to
//! two wrappers around `ciborium`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Error, Result};

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).expect("cbor encoding into a vec cannot fail");
    out
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    ciborium::from_reader(payload).map_err(|err| Error::Cbor(err.to_string()))
}
