use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::storage::codec::IndexDef;
use crate::storage::types::{EdgeRecord, ElementKind, Properties, PropertyValue, VertexRecord};

/// Key/value to element-id multimap for one element family.
pub trait KeyIndex: Send + Sync {
    /// Starts indexing `key`. Returns `false` if it was already indexed.
    fn create(&mut self, key: &str) -> bool;
    /// Stops indexing `key`. Returns `false` if it was not indexed.
    fn drop_key(&mut self, key: &str) -> bool;
    /// Whether `key` is indexed.
    fn contains_key(&self, key: &str) -> bool;
    /// Indexed keys in sorted order.
    fn keys(&self) -> Vec<String>;
    /// Adds `id` under `key = value` if `key` is indexed.
    fn insert(&mut self, key: &str, value: &PropertyValue, id: Uuid);
    /// Removes `id` from `key = value`.
    fn remove(&mut self, key: &str, value: &PropertyValue, id: Uuid);
    /// Ids stored under `key = value`, or `None` if `key` is not indexed.
    fn lookup(&self, key: &str, value: &PropertyValue) -> Option<Vec<Uuid>>;
}

/// Hash-map backed [`KeyIndex`].
#[derive(Default, Debug)]
pub struct MemoryKeyIndex {
    keys: HashMap<String, HashMap<String, BTreeSet<Uuid>>>,
}

impl KeyIndex for MemoryKeyIndex {
    fn create(&mut self, key: &str) -> bool {
        if self.keys.contains_key(key) {
            return false;
        }
        self.keys.insert(key.to_owned(), HashMap::new());
        true
    }

    fn drop_key(&mut self, key: &str) -> bool {
        self.keys.remove(key).is_some()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn insert(&mut self, key: &str, value: &PropertyValue, id: Uuid) {
        if let Some(values) = self.keys.get_mut(key) {
            values.entry(value.index_key()).or_default().insert(id);
        }
    }

    fn remove(&mut self, key: &str, value: &PropertyValue, id: Uuid) {
        if let Some(values) = self.keys.get_mut(key) {
            let canonical = value.index_key();
            if let Some(ids) = values.get_mut(&canonical) {
                ids.remove(&id);
                if ids.is_empty() {
                    values.remove(&canonical);
                }
            }
        }
    }

    fn lookup(&self, key: &str, value: &PropertyValue) -> Option<Vec<Uuid>> {
        let values = self.keys.get(key)?;
        Some(
            values
                .get(&value.index_key())
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
        )
    }
}

/// The vertex and edge indexes of one store.
pub struct IndexSet {
    vertices: Box<dyn KeyIndex>,
    edges: Box<dyn KeyIndex>,
}

impl Default for IndexSet {
    fn default() -> Self {
        Self {
            vertices: Box::<MemoryKeyIndex>::default(),
            edges: Box::<MemoryKeyIndex>::default(),
        }
    }
}

impl std::fmt::Debug for IndexSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSet")
            .field("vertices", &self.vertices.keys())
            .field("edges", &self.edges.keys())
            .finish()
    }
}

impl IndexSet {
    fn family(&self, kind: ElementKind) -> &dyn KeyIndex {
        match kind {
            ElementKind::Vertex => self.vertices.as_ref(),
            ElementKind::Edge => self.edges.as_ref(),
        }
    }

    fn family_mut(&mut self, kind: ElementKind) -> &mut Box<dyn KeyIndex> {
        match kind {
            ElementKind::Vertex => &mut self.vertices,
            ElementKind::Edge => &mut self.edges,
        }
    }

    /// Indexed keys for `kind`.
    pub fn keys(&self, kind: ElementKind) -> Vec<String> {
        self.family(kind).keys()
    }

    /// Whether `key` is indexed for `kind`.
    pub fn contains(&self, kind: ElementKind, key: &str) -> bool {
        self.family(kind).contains_key(key)
    }

    /// Every definition, vertices first.
    pub fn defs(&self) -> Vec<IndexDef> {
        [ElementKind::Vertex, ElementKind::Edge]
            .into_iter()
            .flat_map(|kind| {
                self.keys(kind)
                    .into_iter()
                    .map(move |key| IndexDef { kind, key })
            })
            .collect()
    }

    /// Creates an index and fills it from `elements`.
    pub fn create<'a>(
        &mut self,
        kind: ElementKind,
        key: &str,
        elements: impl Iterator<Item = (Uuid, &'a Properties)>,
    ) -> bool {
        let index = self.family_mut(kind);
        if !index.create(key) {
            return false;
        }
        for (id, props) in elements {
            if let Some(value) = props.get(key) {
                index.insert(key, value, id);
            }
        }
        true
    }

    /// Drops an index.
    pub fn drop_key(&mut self, kind: ElementKind, key: &str) -> bool {
        self.family_mut(kind).drop_key(key)
    }

    /// Ids under `key = value`, or `None` if the key is not indexed.
    pub fn lookup(&self, kind: ElementKind, key: &str, value: &PropertyValue) -> Option<Vec<Uuid>> {
        self.family(kind).lookup(key, value)
    }

    /// Replaces the indexed properties of a vertex.
    pub fn update_vertex(&mut self, old: Option<&VertexRecord>, new: Option<&VertexRecord>) {
        let id = old.or(new).map(|v| v.id.0);
        if let Some(id) = id {
            self.update(
                ElementKind::Vertex,
                id,
                old.map(|v| &v.properties),
                new.map(|v| &v.properties),
            );
        }
    }

    /// Replaces the indexed properties of an edge.
    pub fn update_edge(&mut self, old: Option<&EdgeRecord>, new: Option<&EdgeRecord>) {
        let id = old.or(new).map(|e| e.id.0);
        if let Some(id) = id {
            self.update(
                ElementKind::Edge,
                id,
                old.map(|e| &e.properties),
                new.map(|e| &e.properties),
            );
        }
    }

    fn update(
        &mut self,
        kind: ElementKind,
        id: Uuid,
        old: Option<&Properties>,
        new: Option<&Properties>,
    ) {
        let index = self.family_mut(kind);
        for key in index.keys() {
            let before = old.and_then(|p| p.get(&key));
            let after = new.and_then(|p| p.get(&key));
            if before == after {
                continue;
            }
            if let Some(value) = before {
                index.remove(&key, value, id);
            }
            if let Some(value) = after {
                index.insert(&key, value, id);
            }
        }
    }
}
