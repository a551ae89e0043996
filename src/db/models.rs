//! Diesel row structs for the primary store (`nodes`) and log partitions (`readings`).
//!
//! Timestamps are unix milliseconds in the database and `DateTime<Utc>` in the
//! domain types; conversion happens in the `From` impls below.

use diesel::prelude::*;

use crate::models::node::Node;
use crate::models::reading::{HistoryEntry, StoredReading};
use crate::schema;
use crate::utils::from_millis;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::nodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NodeRow {
    pub doc_id: String,
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub frequency: i64,
    pub online: bool,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::nodes)]
pub struct NewNodeRow {
    pub doc_id: String,
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub frequency: i64,
    pub online: bool,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Partial update of a node's current reading. `None` fields are left untouched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::nodes)]
pub struct CurrentReadingChangeset {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::readings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReadingRow {
    pub doc_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::readings)]
pub struct NewReadingRow {
    pub doc_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub created_at: i64,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        Node {
            doc_id: row.doc_id,
            id: row.id,
            name: row.name,
            node_type: row.node_type,
            frequency: row.frequency,
            online: row.online,
            temperature: row.temperature,
            humidity: row.humidity,
            created_at: Some(from_millis(row.created_at)),
            updated_at: Some(from_millis(row.updated_at)),
        }
    }
}

impl From<ReadingRow> for StoredReading {
    fn from(row: ReadingRow) -> Self {
        StoredReading {
            doc_id: row.doc_id,
            temperature: row.temperature,
            humidity: row.humidity,
            created_at: from_millis(row.created_at),
        }
    }
}

impl From<(Option<f64>, Option<f64>, i64)> for HistoryEntry {
    fn from((temperature, humidity, created_at): (Option<f64>, Option<f64>, i64)) -> Self {
        HistoryEntry {
            temperature,
            humidity,
            created_at: from_millis(created_at),
        }
    }
}
