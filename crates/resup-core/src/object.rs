//! Object-level types: destination, write options, preconditions, and the
//! metadata returned once an upload is finalized.

use crate::status::{Result, Status, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bucket and object name an upload writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDestination {
    pub bucket: String,
    pub name: String,
}

impl ObjectDestination {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// Conditions on the current object revision that must hold for the upload
/// to succeed. Generation 0 means "the object does not exist".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_generation_match: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_generation_not_match: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_metageneration_match: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_metageneration_not_match: Option<i64>,
}

impl Preconditions {
    /// Only succeed if the object does not exist yet.
    pub fn does_not_exist() -> Self {
        Self {
            if_generation_match: Some(0),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check against the current revision of the object. `generation` is 0 and
    /// `metageneration` is `None` when the object does not exist.
    pub fn check(&self, generation: i64, metageneration: Option<i64>) -> Result<()> {
        let failed = || Status::new(StatusCode::FailedPrecondition, "Precondition Failed");

        if matches!(self.if_generation_match, Some(g) if g != generation) {
            return Err(failed());
        }
        if matches!(self.if_generation_not_match, Some(g) if g == generation) {
            return Err(failed());
        }

        let has_meta_condition =
            self.if_metageneration_match.is_some() || self.if_metageneration_not_match.is_some();
        match metageneration {
            None if has_meta_condition => return Err(failed()),
            None => {}
            Some(current) => {
                if matches!(self.if_metageneration_not_match, Some(m) if m == current) {
                    return Err(failed());
                }
                if matches!(self.if_metageneration_match, Some(m) if m != current) {
                    return Err(failed());
                }
            }
        }
        Ok(())
    }
}

/// Options applied to the object created by an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Preconditions::is_empty")]
    pub preconditions: Preconditions,
}

impl WriteOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_preconditions(mut self, preconditions: Preconditions) -> Self {
        self.preconditions = preconditions;
        self
    }

    pub fn with_if_generation_match(mut self, generation: i64) -> Self {
        self.preconditions.if_generation_match = Some(generation);
        self
    }
}

/// Metadata of a finalized object, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub generation: i64,
    pub metageneration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Lowercase hex SHA-256 of the object contents.
    pub sha256: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Seconds since the UNIX epoch.
    pub time_created: u64,
}
