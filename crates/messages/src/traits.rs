//! Message traits.

use fleet_types::ServiceError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A payload that travels over the bus.
pub trait BusMessage: Serialize + DeserializeOwned {
    /// Operation name, the subject component after the service name.
    fn operation() -> &'static str;
}

/// A reply payload: success flag plus an error on failure.
pub trait Reply: DeserializeOwned {
    fn success(&self) -> bool;

    fn error(&self) -> Option<&ServiceError>;
}

/// Type-safe request/response pairing.
pub trait Request: BusMessage {
    type Response: Reply;
}
