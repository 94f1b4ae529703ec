//! Typed provider and resource graphs handed to Terraform.
//!
//! Builders never write free-form JSON. They insert [`Resource`] nodes into a
//! [`ResourceGraph`], which rejects malformed keys, duplicates, and any
//! reference to a node that has not been inserted yet. Serialisation into the
//! `*.tf.json` document shape happens only at the edge.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value, json};
use thiserror::Error;

/// Errors raised while assembling provider or resource graphs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GraphError {
    /// Raised when a key is not a valid Terraform identifier.
    #[error("invalid {kind} key '{key}': keys must start with a letter or underscore and contain only letters, digits, '-' or '_'")]
    InvalidKey {
        /// Resource type or provider plugin the key belongs to.
        kind: String,
        /// Offending key.
        key: String,
    },
    /// Raised when the same resource is inserted twice.
    #[error("resource {reference} already exists")]
    DuplicateResource {
        /// Address of the duplicated resource.
        reference: ResourceRef,
    },
    /// Raised when a resource references a node missing from the graph.
    #[error("resource {from} references {to}, which does not exist")]
    DanglingReference {
        /// Resource holding the reference.
        from: ResourceRef,
        /// Missing target.
        to: ResourceRef,
    },
}

/// Returns `true` when `key` is usable as a Terraform resource name or
/// provider alias.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Maps an arbitrary name onto a valid resource key.
///
/// Dots and other separators become `-`; a leading digit or dash is prefixed
/// with `_`.
#[must_use]
pub fn sanitize_key(name: &str) -> String {
    let mut key: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if !key.starts_with(|ch: char| ch.is_ascii_alphabetic() || ch == '_') {
        key.insert(0, '_');
    }
    key
}

/// Address of a resource node (`<type>.<key>`).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceRef {
    kind: String,
    key: String,
}

impl ResourceRef {
    /// Creates a reference to `kind.key`.
    #[must_use]
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Resource type, for example `aws_instance`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Resource key within its type.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Terraform interpolation for one attribute of the referenced resource.
    #[must_use]
    pub fn interpolate(&self, attribute: &str) -> String {
        format!("${{{self}.{attribute}}}")
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.key)
    }
}

/// A single resource node with its attributes and outgoing edges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    reference: ResourceRef,
    attributes: Map<String, Value>,
    depends_on: Vec<ResourceRef>,
    embeds: Vec<ResourceRef>,
}

impl Resource {
    /// Starts a resource of type `kind` stored under `key`.
    #[must_use]
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            reference: ResourceRef::new(kind, key),
            attributes: Map::new(),
            depends_on: Vec::new(),
            embeds: Vec::new(),
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_owned(), value.into());
        self
    }

    /// Adds an explicit `depends_on` edge.
    #[must_use]
    pub fn depends_on(mut self, target: &ResourceRef) -> Self {
        if !self.depends_on.contains(target) {
            self.depends_on.push(target.clone());
        }
        self
    }

    /// Records that an attribute embeds an identifier of `target` (an
    /// interpolation or a provider URI). Embedded references are checked like
    /// `depends_on` edges but are not emitted.
    #[must_use]
    pub fn embeds(mut self, target: &ResourceRef) -> Self {
        if !self.embeds.contains(target) {
            self.embeds.push(target.clone());
        }
        self
    }

    /// Address of this resource.
    #[must_use]
    pub const fn reference(&self) -> &ResourceRef {
        &self.reference
    }

    /// Attribute map, excluding `depends_on`.
    #[must_use]
    pub const fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Looks up a single attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Explicit dependencies in insertion order.
    #[must_use]
    pub fn dependencies(&self) -> &[ResourceRef] {
        &self.depends_on
    }

    fn references(&self) -> impl Iterator<Item = &ResourceRef> {
        self.depends_on.iter().chain(self.embeds.iter())
    }

    fn to_value(&self) -> Value {
        let mut body = self.attributes.clone();
        if !self.depends_on.is_empty() {
            let edges = self
                .depends_on
                .iter()
                .map(|edge| Value::String(edge.to_string()))
                .collect();
            body.insert(String::from("depends_on"), Value::Array(edges));
        }
        Value::Object(body)
    }
}

/// Resource graph keyed by resource type and then by resource key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceGraph {
    nodes: BTreeMap<String, BTreeMap<String, Resource>>,
}

impl ResourceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource after checking its key and every reference it holds.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] when the key is invalid, the resource already
    /// exists, or a referenced node is missing.
    pub fn insert(&mut self, resource: Resource) -> Result<ResourceRef, GraphError> {
        let reference = resource.reference().clone();
        if !is_valid_key(reference.key()) {
            return Err(GraphError::InvalidKey {
                kind: reference.kind().to_owned(),
                key: reference.key().to_owned(),
            });
        }
        if self.contains(&reference) {
            return Err(GraphError::DuplicateResource { reference });
        }
        if let Some(missing) = resource.references().find(|target| !self.contains(target)) {
            return Err(GraphError::DanglingReference {
                from: reference,
                to: missing.clone(),
            });
        }

        self.nodes
            .entry(reference.kind().to_owned())
            .or_default()
            .insert(reference.key().to_owned(), resource);
        Ok(reference)
    }

    /// Returns the existing node at `kind.key`, inserting the one produced by
    /// `build` when absent. Used for shared regional resources.
    ///
    /// # Errors
    ///
    /// Propagates [`GraphError`] from [`ResourceGraph::insert`].
    pub fn ensure(
        &mut self,
        kind: &str,
        key: &str,
        build: impl FnOnce() -> Resource,
    ) -> Result<ResourceRef, GraphError> {
        let reference = ResourceRef::new(kind, key);
        if self.contains(&reference) {
            return Ok(reference);
        }
        self.insert(build())
    }

    /// Returns `true` when `reference` exists.
    #[must_use]
    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.get(reference.kind(), reference.key()).is_some()
    }

    /// Looks up a node.
    #[must_use]
    pub fn get(&self, kind: &str, key: &str) -> Option<&Resource> {
        self.nodes.get(kind).and_then(|resources| resources.get(key))
    }

    /// Iterates over all nodes of one resource type.
    pub fn resources_of<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.nodes
            .get(kind)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Number of nodes of one resource type.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.nodes.get(kind).map_or(0, BTreeMap::len)
    }

    /// Total number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` when the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the `{"resource": {...}}` document.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let resources: Map<String, Value> = self
            .nodes
            .iter()
            .map(|(kind, nodes)| {
                let body: Map<String, Value> = nodes
                    .iter()
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect();
                (kind.clone(), Value::Object(body))
            })
            .collect();
        json!({ "resource": resources })
    }
}

/// One provider configuration block selected through its alias.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderBlock {
    alias: String,
    settings: Map<String, Value>,
}

impl ProviderBlock {
    /// Alias used by resources to select this block.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Provider settings other than the alias.
    #[must_use]
    pub const fn settings(&self) -> &Map<String, Value> {
        &self.settings
    }
}

/// Provider instances for one plugin, one block per distinct alias in order
/// of first appearance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderGraph {
    plugin: String,
    blocks: Vec<ProviderBlock>,
}

impl ProviderGraph {
    /// Creates an empty graph for `plugin` (for example `aws`).
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            blocks: Vec::new(),
        }
    }

    /// Adds a block unless one with the same alias already exists. Returns
    /// `true` when a block was added.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::InvalidKey`] when the alias is not a valid
    /// identifier.
    pub fn push(&mut self, alias: &str, settings: Map<String, Value>) -> Result<bool, GraphError> {
        if !is_valid_key(alias) {
            return Err(GraphError::InvalidKey {
                kind: self.plugin.clone(),
                key: alias.to_owned(),
            });
        }
        if self.has_alias(alias) {
            return Ok(false);
        }
        self.blocks.push(ProviderBlock {
            alias: alias.to_owned(),
            settings,
        });
        Ok(true)
    }

    /// Provider plugin name.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Returns `true` when a block with `alias` exists.
    #[must_use]
    pub fn has_alias(&self, alias: &str) -> bool {
        self.blocks.iter().any(|block| block.alias == alias)
    }

    /// Aliases in order of first appearance.
    #[must_use]
    pub fn aliases(&self) -> Vec<&str> {
        self.blocks.iter().map(|block| block.alias.as_str()).collect()
    }

    /// Provider blocks in order of first appearance.
    #[must_use]
    pub fn blocks(&self) -> &[ProviderBlock] {
        &self.blocks
    }

    /// Value for a resource's `provider` meta-argument, when the alias exists.
    #[must_use]
    pub fn provider_ref(&self, alias: &str) -> Option<String> {
        self.has_alias(alias)
            .then(|| format!("{}.{alias}", self.plugin))
    }

    /// Renders the `{"provider": {"<plugin>": [...]}}` document.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let blocks: Vec<Value> = self
            .blocks
            .iter()
            .map(|block| {
                let mut body = Map::new();
                body.insert(String::from("alias"), Value::String(block.alias.clone()));
                body.extend(block.settings.clone());
                Value::Object(body)
            })
            .collect();
        let mut plugins = Map::new();
        plugins.insert(self.plugin.clone(), Value::Array(blocks));
        json!({ "provider": plugins })
    }
}
