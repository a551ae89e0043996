//! Node documents: identity, metadata and the last-known reading of one sensor unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::liveness;
use crate::utils::{MAX_PARTITION_FILE_NAME, partition_file_name};

pub const DEFAULT_NAME: &str = "Un-named";
/// Tag carried by every node document.
pub const NODE_TYPE: &str = "node";
/// Expected reporting interval, milliseconds.
pub const DEFAULT_FREQUENCY_MS: i64 = 60_000;

/// A node as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Store-assigned document identifier.
    #[serde(rename = "_id")]
    pub doc_id: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub frequency: i64,
    /// Last stored liveness flag; see [`Node::is_online`] for the computed value.
    pub online: bool,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        liveness::is_online(self, now)
    }
}

/// Caller-supplied fields for registering a node. Anything left out keeps its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFields {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub frequency: Option<i64>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

impl NodeFields {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn frequency(mut self, millis: i64) -> Self {
        self.frequency = Some(millis);
        self
    }

    /// Parse a registration body. Unknown keys are ignored.
    pub fn from_json(body: &str) -> Result<Self> {
        let de = &mut serde_json::Deserializer::from_str(body);
        Ok(serde_path_to_error::deserialize(de)?)
    }

    /// The registered node ID, or a validation error when it is absent, blank
    /// or too long to name the node's reading log file.
    pub(crate) fn validated_id(&self) -> Result<&str> {
        let id = match self.id.as_deref() {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(Error::Validation("node id is required".to_string())),
        };
        let encoded = partition_file_name(id).len();
        if encoded > MAX_PARTITION_FILE_NAME {
            return Err(Error::Validation(format!(
                "node id is too long ({} bytes once encoded, at most {})",
                encoded, MAX_PARTITION_FILE_NAME
            )));
        }
        Ok(id)
    }

    pub(crate) fn validated_frequency(&self) -> Result<i64> {
        match self.frequency {
            None => Ok(DEFAULT_FREQUENCY_MS),
            Some(f) if f > 0 => Ok(f),
            Some(f) => Err(Error::Validation(format!("frequency must be positive, got {}", f))),
        }
    }
}

/// A node together with its liveness evaluated at a given instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub node: Node,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
    #[serde(rename = "checkedAt")]
    pub checked_at: DateTime<Utc>,
}
