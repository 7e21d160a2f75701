//! Graph schema: uniqueness constraints and lookup indexes.

use ripple_core::NodeKind;
use tracing::info;

use crate::error::GraphResult;
use crate::store::GraphStore;

/// Label carried by every node, so keys stay unique across node types.
pub const NODE_LABEL: &str = "GraphNode";

/// Property holding the node type label; kept apart from node properties.
pub const KIND_PROPERTY: &str = "node_kind";

/// One constraint or index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaElement {
    pub name: String,
    pub label: &'static str,
    pub property: &'static str,
    pub unique: bool,
}

impl SchemaElement {
    fn unique(name: impl Into<String>, label: &'static str, property: &'static str) -> Self {
        Self {
            name: name.into(),
            label,
            property,
            unique: true,
        }
    }

    fn index(name: impl Into<String>, label: &'static str, property: &'static str) -> Self {
        Self {
            name: name.into(),
            label,
            property,
            unique: false,
        }
    }

    /// Cypher statement creating this element. Safe to run repeatedly.
    pub fn cypher(&self) -> String {
        if self.unique {
            format!(
                "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                self.name, self.label, self.property
            )
        } else {
            format!(
                "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                self.name, self.label, self.property
            )
        }
    }
}

/// Every schema element: a global key constraint, then per node type a
/// key constraint and an index on its natural-key property.
pub fn schema_elements() -> Vec<SchemaElement> {
    let mut elements = vec![SchemaElement::unique("graph_node_key", NODE_LABEL, "key")];
    for kind in NodeKind::all() {
        let prefix = kind.label().to_lowercase();
        elements.push(SchemaElement::unique(format!("{}_key", prefix), kind.label(), "key"));
        elements.push(SchemaElement::index(
            format!("{}_{}", prefix, kind.natural_key_property()),
            kind.label(),
            kind.natural_key_property(),
        ));
    }
    elements
}

/// Create every constraint and index that does not exist yet.
///
/// Safe to run multiple times.
pub async fn initialize_schema(store: &dyn GraphStore) -> GraphResult<()> {
    let elements = schema_elements();
    info!(backend = store.backend(), "Initializing graph schema...");
    store.apply_schema(&elements).await?;
    info!("Graph schema initialized ({} elements)", elements.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryGraphStore;

    #[test]
    fn test_every_kind_has_key_constraint() {
        let elements = schema_elements();
        for kind in NodeKind::all() {
            assert!(elements
                .iter()
                .any(|e| e.unique && e.label == kind.label() && e.property == "key"));
        }
        assert_eq!(elements.len(), 1 + 2 * NodeKind::all().len());
    }

    #[test]
    fn test_cypher() {
        let elements = schema_elements();
        assert_eq!(
            elements[0].cypher(),
            "CREATE CONSTRAINT graph_node_key IF NOT EXISTS FOR (n:GraphNode) REQUIRE n.key IS UNIQUE"
        );
        let file_index = elements.iter().find(|e| e.name == "file_path").unwrap();
        assert_eq!(
            file_index.cypher(),
            "CREATE INDEX file_path IF NOT EXISTS FOR (n:File) ON (n.path)"
        );
    }

    #[tokio::test]
    async fn test_initialize_twice() {
        let store = MemoryGraphStore::new();
        initialize_schema(&store).await.unwrap();
        initialize_schema(&store).await.unwrap();
        assert_eq!(store.schema_names().await.len(), schema_elements().len());
    }
}
