use crate::domain::DomainResult;
use serde::{Deserialize, Deserializer, Serialize};

/// Capability shared by every type that travels over the bus or an HTTP body.
///
/// Binary fields encode themselves through their serde attributes, so the
/// wire form is always plain JSON.
pub trait WireFormat: Serialize {
    fn to_wire(&self) -> DomainResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Deserialize an explicit `null` the same way as an absent key.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
