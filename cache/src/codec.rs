use crate::error::BoxError;

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The opaque serialized value the cache stores and returns.
pub type Payload = Arc<[u8]>;

/// Converts typed values to and from cache payloads.
pub trait Codec<T>: Send + Sync + 'static {
  fn encode(&self, value: &T) -> Result<Vec<u8>, BoxError>;
  fn decode(&self, bytes: &[u8]) -> Result<T, BoxError>;
}

/// A `Codec` backed by `serde_json`.
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
  pub fn new() -> Self {
    JsonCodec(PhantomData)
  }
}

impl<T> Default for JsonCodec<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for JsonCodec<T> {
  fn clone(&self) -> Self {
    Self::new()
  }
}

impl<T> Codec<T> for JsonCodec<T>
where
  T: Serialize + DeserializeOwned + 'static,
{
  fn encode(&self, value: &T) -> Result<Vec<u8>, BoxError> {
    Ok(serde_json::to_vec(value)?)
  }

  fn decode(&self, bytes: &[u8]) -> Result<T, BoxError> {
    Ok(serde_json::from_slice(bytes)?)
  }
}
