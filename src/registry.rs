//! Node registry: one document per node holding identity, metadata and the
//! last-known reading. It is the source of truth for "current state".

use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::debug;
use std::sync::Arc;

use crate::db::models::{CurrentReadingChangeset, NewNodeRow, NodeRow};
use crate::error::{Error, Result};
use crate::models::node::{DEFAULT_NAME, NODE_TYPE, Node, NodeFields};
use crate::models::reading::Reading;
use crate::schema;
use crate::store::{Location, NODE_MIGRATIONS, Store};
use crate::utils::{new_document_id, now_millis};

#[derive(Debug)]
pub struct NodeRegistry {
    store: Arc<Store>,
}

impl NodeRegistry {
    pub fn open(location: Location) -> Result<Self> {
        let store = Store::open("nodes", location, NODE_MIGRATIONS)?;
        Ok(Self { store: Arc::new(store) })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// All node documents, in store order.
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        use schema::nodes::dsl as N;

        self.store.with_conn(|conn| {
            let rows = N::nodes
                .filter(N::node_type.eq(NODE_TYPE))
                .select(NodeRow::as_select())
                .load::<NodeRow>(conn)?;
            Ok(rows.into_iter().map(Node::from).collect())
        })
    }

    pub fn get_node(&self, id: &str) -> Result<Node> {
        use schema::nodes::dsl as N;

        let mut rows = self.store.with_conn(|conn| {
            Ok(N::nodes
                .filter(N::id.eq(id))
                .select(NodeRow::as_select())
                .limit(2)
                .load::<NodeRow>(conn)?)
        })?;
        match (rows.pop(), rows.is_empty()) {
            (None, _) => Err(Error::NotFound(format!("node {}", id))),
            (Some(row), true) => Ok(row.into()),
            (Some(_), false) => Err(Error::Conflict(format!("more than one node with id {}", id))),
        }
    }

    /// Register a node. Unspecified fields take the node defaults; an ID that is
    /// already registered is rejected with `Conflict`.
    pub fn create_node(&self, fields: NodeFields) -> Result<Node> {
        use schema::nodes::dsl as N;

        let id = fields.validated_id()?.to_string();
        let frequency = fields.validated_frequency()?;
        let now = now_millis();
        let row = NewNodeRow {
            doc_id: new_document_id(),
            id,
            name: fields.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            node_type: NODE_TYPE.to_string(),
            frequency,
            online: fields.online.unwrap_or(false),
            temperature: fields.temperature,
            humidity: fields.humidity,
            created_at: now,
            updated_at: now,
        };

        let stored = self.store.with_conn(|conn| {
            let existing: i64 = N::nodes.filter(N::id.eq(&row.id)).count().get_result(conn)?;
            if existing > 0 {
                return Err(already_registered(&row.id));
            }
            match diesel::insert_into(N::nodes).values(&row).execute(conn) {
                Ok(_) => {}
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    return Err(already_registered(&row.id));
                }
                Err(e) => return Err(e.into()),
            }
            Ok(N::nodes
                .find(row.doc_id.as_str())
                .select(NodeRow::as_select())
                .first::<NodeRow>(conn)?)
        })?;
        debug!("Registered node {} as document {}", stored.id, stored.doc_id);
        Ok(stored.into())
    }

    /// Merge `reading` into the node's current-reading fields and refresh
    /// `updated_at`. Absent fields keep their stored value.
    pub fn set_current_reading(&self, id: &str, reading: &Reading) -> Result<()> {
        use schema::nodes::dsl as N;

        let changes = CurrentReadingChangeset {
            temperature: reading.temperature,
            humidity: reading.humidity,
            updated_at: now_millis(),
        };
        let updated = self.store.with_conn(|conn| {
            Ok(diesel::update(N::nodes.filter(N::id.eq(id)))
                .set(&changes)
                .execute(conn)?)
        })?;
        if updated == 0 {
            return Err(Error::NotFound(format!("node {}", id)));
        }
        Ok(())
    }

    /// The node's current `{temperature, humidity}`.
    pub fn current_reading(&self, id: &str) -> Result<Reading> {
        use schema::nodes::dsl as N;

        let fields: Option<(Option<f64>, Option<f64>)> = self.store.with_conn(|conn| {
            Ok(N::nodes
                .filter(N::id.eq(id))
                .select((N::temperature, N::humidity))
                .first(conn)
                .optional()?)
        })?;
        fields
            .map(|(temperature, humidity)| Reading { temperature, humidity })
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }
}

fn already_registered(id: &str) -> Error {
    Error::Conflict(format!("node {} is already registered", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node::DEFAULT_FREQUENCY_MS;

    fn registry() -> NodeRegistry {
        NodeRegistry::open(Location::Memory).unwrap()
    }

    #[test]
    fn registering_without_overrides_uses_defaults() {
        let registry = registry();
        let created = registry.create_node(NodeFields::new("rpi_hub")).unwrap();
        let node = registry.get_node("rpi_hub").unwrap();

        assert_eq!(node, created);
        assert_eq!(node.id, "rpi_hub");
        assert_eq!(node.name, "Un-named");
        assert_eq!(node.node_type, "node");
        assert_eq!(node.frequency, DEFAULT_FREQUENCY_MS);
        assert!(!node.online);
        assert_eq!(node.temperature, None);
        assert_eq!(node.humidity, None);
        assert_eq!(node.doc_id.len(), 16);
        assert!(node.created_at.is_some());
        assert_eq!(node.created_at, node.updated_at);
    }

    #[test]
    fn overrides_replace_defaults() {
        let registry = registry();
        let fields = NodeFields::new("attic").name("Attic").frequency(30_000);
        registry.create_node(fields).unwrap();
        let node = registry.get_node("attic").unwrap();
        assert_eq!(node.name, "Attic");
        assert_eq!(node.frequency, 30_000);
    }

    #[test]
    fn list_counts_every_registration() {
        let registry = registry();
        assert!(registry.list_nodes().unwrap().is_empty());
        registry.create_node(NodeFields::new("test1")).unwrap();
        registry.create_node(NodeFields::new("test2")).unwrap();
        let mut ids: Vec<_> = registry.list_nodes().unwrap().into_iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["test1", "test2"]);
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let registry = registry();
        registry.create_node(NodeFields::new("rpi_hub")).unwrap();
        let err = registry.create_node(NodeFields::new("rpi_hub").name("again")).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "{err}");
        assert_eq!(registry.list_nodes().unwrap().len(), 1);
        assert_eq!(registry.get_node("rpi_hub").unwrap().name, "Un-named");
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let registry = registry();
        assert!(matches!(registry.create_node(NodeFields::default()), Err(Error::Validation(_))));
        assert!(matches!(
            registry.create_node(NodeFields::new("x").frequency(-1)),
            Err(Error::Validation(_))
        ));
        assert!(registry.list_nodes().unwrap().is_empty());
    }

    #[test]
    fn missing_node_is_not_found() {
        let registry = registry();
        assert!(matches!(registry.get_node("missing"), Err(Error::NotFound(_))));
        assert!(matches!(registry.current_reading("missing"), Err(Error::NotFound(_))));
        assert!(matches!(
            registry.set_current_reading("missing", &Reading::new(1.0, 2.0)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn current_reading_is_merged_field_by_field() {
        let registry = registry();
        registry.create_node(NodeFields::new("rpi_hub")).unwrap();

        registry.set_current_reading("rpi_hub", &Reading::new(30.0, 40.0)).unwrap();
        assert_eq!(registry.current_reading("rpi_hub").unwrap(), Reading::new(30.0, 40.0));

        let only_temperature = Reading {
            temperature: Some(35.0),
            humidity: None,
        };
        registry.set_current_reading("rpi_hub", &only_temperature).unwrap();
        let node = registry.get_node("rpi_hub").unwrap();
        assert_eq!(node.temperature, Some(35.0));
        assert_eq!(node.humidity, Some(40.0));
        assert_eq!(node.name, "Un-named");
        assert!(node.updated_at >= node.created_at);
    }
}
