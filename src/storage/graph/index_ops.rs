use tracing::info;

use super::GraphStore;
use crate::storage::codec::IndexDef;
use crate::storage::types::{
    validate_property_key, EdgeRecord, ElementKind, PropertyValue, VertexRecord,
};
use crate::types::Result;

impl GraphStore {
    /// Starts indexing `key` for one element family.
    ///
    /// The metadata file is rewritten before the index is built so the key
    /// survives a restart. Returns `false` if the key was already indexed.
    pub fn create_key_index(&self, kind: ElementKind, key: &str) -> Result<bool> {
        validate_property_key(key)?;
        let writer = self.writer.lock();
        self.check_open(&writer)?;
        let mut defs = self.core.state.read(|state| state.indexes.defs());
        if defs.iter().any(|def| def.kind == kind && def.key == key) {
            return Ok(false);
        }
        defs.push(IndexDef {
            kind,
            key: key.to_owned(),
        });
        defs.sort();
        if let Some(pipeline) = self.pipeline.as_ref() {
            pipeline.rewrite_meta(&defs)?;
        }
        self.core.state.write().create_index(kind, key);
        info!(kind = ?kind, key, "graph.index.created");
        Ok(true)
    }

    /// Stops indexing `key`. Returns `false` if it was not indexed.
    pub fn drop_key_index(&self, kind: ElementKind, key: &str) -> Result<bool> {
        let writer = self.writer.lock();
        self.check_open(&writer)?;
        let mut defs = self.core.state.read(|state| state.indexes.defs());
        let before = defs.len();
        defs.retain(|def| !(def.kind == kind && def.key == key));
        if defs.len() == before {
            return Ok(false);
        }
        if let Some(pipeline) = self.pipeline.as_ref() {
            pipeline.rewrite_meta(&defs)?;
        }
        self.core.state.write().indexes.drop_key(kind, key);
        info!(kind = ?kind, key, "graph.index.dropped");
        Ok(true)
    }

    /// Indexed keys of one element family, sorted.
    pub fn indexed_keys(&self, kind: ElementKind) -> Vec<String> {
        self.core.state.read(|state| state.indexes.keys(kind))
    }

    /// Vertices whose `key` property equals `value`.
    ///
    /// Uses the key index when one exists; otherwise scans every vertex, or
    /// fails with [`crate::BitsyError::MissingIndex`] when scans are disabled.
    pub fn lookup_vertices(&self, key: &str, value: &PropertyValue) -> Result<Vec<VertexRecord>> {
        let allow_scan = self.opts.allow_full_graph_scans;
        self.core
            .state
            .read(|state| state.lookup_vertices(key, value, allow_scan))
    }

    /// Edges whose `key` property equals `value`.
    pub fn lookup_edges(&self, key: &str, value: &PropertyValue) -> Result<Vec<EdgeRecord>> {
        let allow_scan = self.opts.allow_full_graph_scans;
        self.core
            .state
            .read(|state| state.lookup_edges(key, value, allow_scan))
    }
}
