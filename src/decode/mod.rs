//! Payload decoders.
//!
//! The engine returns raw payloads; decoding into typed records happens
//! afterwards through a [`Decoder`], keeping the engine payload-agnostic.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::errors::{QueryError, QueryResult};
use crate::transport::RawResponse;

/// Turns a raw response into a typed record.
pub trait Decoder: Send + Sync {
    /// Decoded record type.
    type Output;

    /// Decodes one response.
    fn decode(&self, response: &RawResponse) -> QueryResult<Self::Output>;
}

/// Decodes JSON bodies with serde.
pub struct JsonDecoder<T> {
    pointer: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    /// Decodes the whole body.
    pub fn new() -> Self {
        Self {
            pointer: None,
            _marker: PhantomData,
        }
    }

    /// Decodes the value at a JSON pointer (e.g. `/response/players`).
    pub fn at(pointer: impl Into<String>) -> Self {
        Self {
            pointer: Some(pointer.into()),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDecoder")
            .field("pointer", &self.pointer)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> Decoder for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, response: &RawResponse) -> QueryResult<T> {
        let status = Some(response.status);
        match &self.pointer {
            None => serde_json::from_slice(&response.body)
                .map_err(|e| QueryError::decode(e.to_string(), status)),
            Some(pointer) => {
                let mut value: serde_json::Value = serde_json::from_slice(&response.body)
                    .map_err(|e| QueryError::decode(e.to_string(), status))?;
                let inner = value.pointer_mut(pointer).map(serde_json::Value::take).ok_or_else(|| {
                    QueryError::decode(format!("missing field at '{}'", pointer), status)
                })?;
                serde_json::from_value(inner).map_err(|e| QueryError::decode(e.to_string(), status))
            }
        }
    }
}

/// Returns the body unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Output = Bytes;

    fn decode(&self, response: &RawResponse) -> QueryResult<Bytes> {
        Ok(response.body.clone())
    }
}

/// Decodes the body as UTF-8 text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    type Output = String;

    fn decode(&self, response: &RawResponse) -> QueryResult<String> {
        String::from_utf8(response.body.to_vec())
            .map_err(|e| QueryError::decode(e.to_string(), Some(response.status)))
    }
}
