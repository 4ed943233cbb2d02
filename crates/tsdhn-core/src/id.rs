//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::{Uuid, Version};

use crate::Error;

/// Identifier of a job. Always a random (version 4) UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random JobId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an externally supplied identifier, rejecting anything that is not a v4 UUID.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let uuid = Uuid::parse_str(input)
            .map_err(|_| Error::Validation(format!("invalid job identifier: {input:?}")))?;
        Self::try_from(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Uuid> for JobId {
    type Error = Error;

    fn try_from(uuid: Uuid) -> crate::Result<Self> {
        match uuid.get_version() {
            Some(Version::Random) => Ok(Self(uuid)),
            _ => Err(Error::Validation(format!(
                "invalid job identifier: {uuid} is not a version 4 UUID"
            ))),
        }
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}
