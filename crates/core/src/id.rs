//! Identifiers threaded, unmodified, through every pipeline hop.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// AMQP short strings (where these travel as message properties) cap at 255 bytes.
const MAX_LEN: usize = 255;

/// Identifier of one end-user job across all stages.
///
/// Opaque: stages never parse it. Generated once at ingress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

/// Destination the terminal stage delivers the final result to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplyTo(String);

macro_rules! impl_opaque_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                if value.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                if value.len() > MAX_LEN {
                    return Err(DomainError::invalid_id(format!(
                        "{}: {} bytes exceeds {}",
                        $name,
                        value.len(),
                        MAX_LEN
                    )));
                }
                Ok(Self(value))
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(s.to_string())
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_opaque_newtype!(CorrelationId, "CorrelationId");
impl_opaque_newtype!(ReplyTo, "ReplyTo");

impl CorrelationId {
    /// Create a fresh identifier (UUIDv7 text, time-ordered).
    ///
    /// Only ingress calls this; every later hop copies the inbound value.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}
