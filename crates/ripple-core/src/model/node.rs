use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::finding::Severity;

/// Deterministic identity of a node, derived from its natural key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Class,
    Method,
    Query,
    Entity,
    Issue,
}

impl NodeKind {
    /// The store label for this node type.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::Class => "Class",
            NodeKind::Method => "Method",
            NodeKind::Query => "Query",
            NodeKind::Entity => "Entity",
            NodeKind::Issue => "Issue",
        }
    }

    /// Property that carries the human-facing part of the natural key.
    pub fn natural_key_property(&self) -> &'static str {
        match self {
            NodeKind::File => "path",
            NodeKind::Class => "name",
            NodeKind::Method => "signature",
            NodeKind::Query => "line",
            NodeKind::Entity => "name",
            NodeKind::Issue => "kind",
        }
    }

    pub fn all() -> [NodeKind; 6] {
        [
            NodeKind::File,
            NodeKind::Class,
            NodeKind::Method,
            NodeKind::Query,
            NodeKind::Entity,
            NodeKind::Issue,
        ]
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::all().into_iter().find(|k| k.label() == label)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A scalar property value written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Non-key properties of a node or relationship, in stable order.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Kind of data store an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Table,
    Collection,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Table => "table",
            StoreKind::Collection => "collection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(Self::Table),
            "collection" => Some(Self::Collection),
            _ => None,
        }
    }
}

/// Statement type inferred from the first keyword of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Batch,
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Batch => "BATCH",
            QueryType::Unknown => "UNKNOWN",
        }
    }

    /// Only SELECT statements are reads.
    pub fn is_read(&self) -> bool {
        matches!(self, QueryType::Select)
    }
}

// Node types compare and hash by key only, so two instances built from
// different findings for the same real-world thing are equal.
macro_rules! key_identity {
    ($ty:ty) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.key == other.key
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.key.hash(state);
            }
        }

        impl $ty {
            pub fn key(&self) -> &NodeKey {
                &self.key
            }
        }
    };
}

/// A source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    key: NodeKey,
    pub path: String,
    pub language: String,
    pub size: Option<u64>,
    pub is_target: bool,
    pub occurrences: u32,
}

impl FileNode {
    pub fn new(path: impl Into<String>, language: impl Into<String>, is_target: bool) -> Self {
        let path = path.into();
        Self {
            key: NodeKey::new(path.clone()),
            path,
            language: language.into(),
            size: None,
            is_target,
            occurrences: 1,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

key_identity!(FileNode);

/// A class (or module acting as one) inside a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassNode {
    key: NodeKey,
    pub name: String,
    pub package: String,
    pub file_ref: NodeKey,
    pub occurrences: u32,
}

impl ClassNode {
    pub fn new(name: impl Into<String>, package: impl Into<String>, file_ref: NodeKey) -> Self {
        let name = name.into();
        Self {
            key: NodeKey::new(format!("{}::{}", file_ref, name)),
            name,
            package: package.into(),
            file_ref,
            occurrences: 1,
        }
    }
}

key_identity!(ClassNode);

/// A method defined by a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodNode {
    key: NodeKey,
    pub name: String,
    pub signature: String,
    pub class_ref: NodeKey,
    pub occurrences: u32,
}

impl MethodNode {
    pub fn new(name: impl Into<String>, signature: impl Into<String>, class_ref: NodeKey) -> Self {
        let signature = signature.into();
        Self {
            key: NodeKey::new(format!("{}::{}", class_ref, signature)),
            name: name.into(),
            signature,
            class_ref,
            occurrences: 1,
        }
    }
}

key_identity!(MethodNode);

/// A query executed by a method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryNode {
    key: NodeKey,
    pub text: String,
    pub query_type: QueryType,
    pub line: u32,
    pub complexity: u32,
    pub method_ref: NodeKey,
    pub occurrences: u32,
}

impl QueryNode {
    pub fn new(
        text: impl Into<String>,
        query_type: QueryType,
        line: u32,
        complexity: u32,
        method_ref: NodeKey,
    ) -> Self {
        let text = text.into();
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, text.trim().as_bytes());
        Self {
            key: NodeKey::new(format!("{}@{}#{}", method_ref, line, digest.simple())),
            text,
            query_type,
            line,
            complexity,
            method_ref,
            occurrences: 1,
        }
    }
}

key_identity!(QueryNode);

/// A data entity (table, collection) accessed by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    key: NodeKey,
    pub name: String,
    pub store_kind: StoreKind,
    pub occurrences: u32,
}

impl EntityNode {
    pub fn new(name: impl Into<String>, store_kind: StoreKind) -> Self {
        let name = name.into();
        Self {
            key: NodeKey::new(format!("{}:{}", store_kind.as_str(), name)),
            name,
            store_kind,
            occurrences: 1,
        }
    }
}

key_identity!(EntityNode);

/// An issue detected on a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueNode {
    key: NodeKey,
    pub kind: String,
    pub severity: Severity,
    pub message: Option<String>,
    pub confidence: Option<f64>,
    pub query_ref: NodeKey,
}

impl IssueNode {
    pub fn new(
        kind: impl Into<String>,
        severity: Severity,
        message: Option<String>,
        confidence: Option<f64>,
        query_ref: NodeKey,
    ) -> Self {
        let kind = kind.into();
        Self {
            key: NodeKey::new(format!("{}!{}", query_ref, kind)),
            kind,
            severity,
            message,
            confidence,
            query_ref,
        }
    }
}

key_identity!(IssueNode);

/// Any node of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum Node {
    File(FileNode),
    Class(ClassNode),
    Method(MethodNode),
    Query(QueryNode),
    Entity(EntityNode),
    Issue(IssueNode),
}

impl Node {
    pub fn key(&self) -> &NodeKey {
        match self {
            Node::File(n) => n.key(),
            Node::Class(n) => n.key(),
            Node::Method(n) => n.key(),
            Node::Query(n) => n.key(),
            Node::Entity(n) => n.key(),
            Node::Issue(n) => n.key(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::File(_) => NodeKind::File,
            Node::Class(_) => NodeKind::Class,
            Node::Method(_) => NodeKind::Method,
            Node::Query(_) => NodeKind::Query,
            Node::Entity(_) => NodeKind::Entity,
            Node::Issue(_) => NodeKind::Issue,
        }
    }

    /// Non-key properties written on upsert.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        match self {
            Node::File(n) => {
                props.insert("path".into(), n.path.as_str().into());
                props.insert("language".into(), n.language.as_str().into());
                if let Some(size) = n.size {
                    props.insert("size".into(), PropertyValue::Integer(size as i64));
                }
                props.insert("is_target".into(), n.is_target.into());
                props.insert("occurrences".into(), n.occurrences.into());
            }
            Node::Class(n) => {
                props.insert("name".into(), n.name.as_str().into());
                props.insert("package".into(), n.package.as_str().into());
                props.insert("file".into(), n.file_ref.as_str().into());
                props.insert("occurrences".into(), n.occurrences.into());
            }
            Node::Method(n) => {
                props.insert("name".into(), n.name.as_str().into());
                props.insert("signature".into(), n.signature.as_str().into());
                props.insert("class".into(), n.class_ref.as_str().into());
                props.insert("occurrences".into(), n.occurrences.into());
            }
            Node::Query(n) => {
                props.insert("text".into(), n.text.as_str().into());
                props.insert("query_type".into(), n.query_type.as_str().into());
                props.insert("line".into(), n.line.into());
                props.insert("complexity".into(), n.complexity.into());
                props.insert("method".into(), n.method_ref.as_str().into());
                props.insert("occurrences".into(), n.occurrences.into());
            }
            Node::Entity(n) => {
                props.insert("name".into(), n.name.as_str().into());
                props.insert("store_kind".into(), n.store_kind.as_str().into());
                props.insert("occurrences".into(), n.occurrences.into());
            }
            Node::Issue(n) => {
                props.insert("kind".into(), n.kind.as_str().into());
                props.insert("severity".into(), n.severity.as_str().into());
                if let Some(message) = &n.message {
                    props.insert("message".into(), message.as_str().into());
                }
                if let Some(confidence) = n.confidence {
                    props.insert("confidence".into(), confidence.into());
                }
                props.insert("query".into(), n.query_ref.as_str().into());
            }
        }
        props
    }

    /// Fold a duplicate of this node into it.
    ///
    /// Only auxiliary properties move: occurrence counters add up, a file
    /// seen as an analysis target stays one, and missing optional values are
    /// filled in. Key fields never change.
    pub fn absorb(&mut self, other: &Node) {
        match (self, other) {
            (Node::File(a), Node::File(b)) => {
                a.occurrences += b.occurrences;
                a.is_target |= b.is_target;
                if a.language.is_empty() {
                    a.language = b.language.clone();
                }
                if a.size.is_none() {
                    a.size = b.size;
                }
            }
            (Node::Class(a), Node::Class(b)) => {
                a.occurrences += b.occurrences;
                if a.package.is_empty() {
                    a.package = b.package.clone();
                }
            }
            (Node::Method(a), Node::Method(b)) => a.occurrences += b.occurrences,
            (Node::Query(a), Node::Query(b)) => a.occurrences += b.occurrences,
            (Node::Entity(a), Node::Entity(b)) => a.occurrences += b.occurrences,
            (Node::Issue(a), Node::Issue(b)) => {
                if a.message.is_none() {
                    a.message = b.message.clone();
                }
                a.confidence = match (a.confidence, b.confidence) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (x, y) => x.or(y),
                };
            }
            _ => {}
        }
    }
}
