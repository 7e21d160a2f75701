use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::node::{NodeKey, Properties, PropertyValue};

/// The type of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// File -> Class
    Contains,
    /// Class -> Method
    Defines,
    /// Method -> Query
    Executes,
    /// Query -> Entity
    Accesses,
    /// Query -> Issue
    HasIssue,
    /// File -> File
    DependsOn,
    /// Method -> Method
    Calls,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "CONTAINS",
            RelationshipType::Defines => "DEFINES",
            RelationshipType::Executes => "EXECUTES",
            RelationshipType::Accesses => "ACCESSES",
            RelationshipType::HasIssue => "HAS_ISSUE",
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::Calls => "CALLS",
        }
    }

    pub fn all() -> [RelationshipType; 7] {
        [
            RelationshipType::Contains,
            RelationshipType::Defines,
            RelationshipType::Executes,
            RelationshipType::Accesses,
            RelationshipType::HasIssue,
            RelationshipType::DependsOn,
            RelationshipType::Calls,
        ]
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a query touches an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOperation {
    Read,
    Write,
}

impl AccessOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOperation::Read => "read",
            AccessOperation::Write => "write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }
}

/// Identity of a relationship: `(source, target, type)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub source: NodeKey,
    pub target: NodeKey,
    pub rel_type: RelationshipType,
}

/// A directed, typed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source: NodeKey,
    pub target: NodeKey,
    pub rel_type: RelationshipType,
    pub properties: Properties,
}

impl Relationship {
    pub fn new(source: NodeKey, target: NodeKey, rel_type: RelationshipType) -> Self {
        Self {
            source,
            target,
            rel_type,
            properties: Properties::new(),
        }
    }

    /// An `ACCESSES` edge tagged with its operation kind.
    pub fn accesses(query: NodeKey, entity: NodeKey, operation: AccessOperation) -> Self {
        let mut rel = Self::new(query, entity, RelationshipType::Accesses);
        rel.properties
            .insert("operation".into(), PropertyValue::from(operation.as_str()));
        rel
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey {
            source: self.source.clone(),
            target: self.target.clone(),
            rel_type: self.rel_type,
        }
    }

    /// The operation of an `ACCESSES` edge.
    pub fn operation(&self) -> Option<AccessOperation> {
        self.properties
            .get("operation")
            .and_then(PropertyValue::as_str)
            .and_then(AccessOperation::parse)
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.target == other.target && self.rel_type == other.rel_type
    }
}

impl Eq for Relationship {}

impl Hash for Relationship {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.target.hash(state);
        self.rel_type.hash(state);
    }
}
