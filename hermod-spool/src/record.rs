//! On-disk form of a spooled envelope.
//!
//! Records are RON documents so that they can be read and repaired by hand:
//!
//! ```ron
//! (
//!     version: 1,
//!     sender: (username: "alice", domain: "example.com"),
//!     recipients: [(username: "bob", domain: "local.test")],
//!     body: ["Subject: hi", "", "hello"],
//!     delivery_attempts: 0,
//!     scheduled_delivery: "2024-05-01T10:00:00Z",
//! )
//! ```

use chrono::{DateTime, Utc};
use hermod_common::{Address, Envelope};
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;

/// Version written by this build. Records carrying any other version are refused.
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolRecord {
    pub version: u32,
    pub sender: Address,
    pub recipients: Vec<Address>,
    pub body: Vec<String>,
    pub delivery_attempts: u32,
    pub scheduled_delivery: DateTime<Utc>,
}

impl From<&Envelope> for SpoolRecord {
    fn from(envelope: &Envelope) -> Self {
        Self {
            version: RECORD_VERSION,
            sender: envelope.sender().clone(),
            recipients: envelope.recipients().to_vec(),
            body: envelope.body().to_vec(),
            delivery_attempts: envelope.delivery_attempts(),
            scheduled_delivery: envelope.scheduled_delivery(),
        }
    }
}

impl SpoolRecord {
    /// # Errors
    /// If RON serialisation fails.
    pub fn encode(&self) -> Result<String, SerializationError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// # Errors
    /// If the text is not a valid record, or was written by an unknown version.
    pub fn decode(text: &str) -> Result<Self, SerializationError> {
        let record: Self = ron::from_str(text)?;

        if record.version != RECORD_VERSION {
            return Err(SerializationError::UnsupportedVersion {
                found: record.version,
                expected: RECORD_VERSION,
            });
        }

        Ok(record)
    }

    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        let mut envelope = Envelope::new(self.sender, self.recipients, self.body);
        envelope.set_delivery_attempts(self.delivery_attempts);
        envelope.schedule(self.scheduled_delivery);
        envelope
    }
}
