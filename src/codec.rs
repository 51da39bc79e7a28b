// src/codec.rs

//! Value encoding shared by both tiers.
//!
//! Both tiers hold the same encoded bytes, so a value written while the remote tier was up
//! decodes identically when it is later served from the local tier.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use crate::error::Result;

/// Serialize/deserialize boundary between typed values and stored bytes
pub trait Codec: Send + Sync + Debug + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Compact JSON with `null` object fields omitted
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let mut tree = serde_json::to_value(value)?;
        strip_nulls(&mut tree);
        Ok(serde_json::to_vec(&tree)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, field| !field.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}
