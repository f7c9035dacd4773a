use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::primitives::log::LogRecord;
use crate::storage::adjacency::{AdjacencyIndex, Dir};
use crate::storage::codec::{self, ElementStamp, IndexDef};
use crate::storage::index::IndexSet;
use crate::storage::types::{
    validate_edge_label, validate_property_key, validate_property_value, EdgeRecord, ElementKind,
    ElementState, Properties, PropertyValue, VertexRecord,
};
use crate::types::{BitsyError, EdgeId, Result, VertexId};

/// A committed element together with the commit that produced it.
#[derive(Clone, Debug)]
pub(crate) struct Stored<R> {
    pub(crate) record: R,
    pub(crate) seq: u64,
}

/// Vertex and edge changes submitted by one transaction.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// Changed vertices.
    pub vertices: Vec<VertexRecord>,
    /// Changed edges.
    pub edges: Vec<EdgeRecord>,
}

impl ChangeSet {
    /// Returns `true` when nothing would be written.
    pub fn is_empty(&self) -> bool {
        self.vertices
            .iter()
            .all(|v| v.state == ElementState::Unmodified)
            && self.edges.iter().all(|e| e.state == ElementState::Unmodified)
    }
}

/// What a successful apply produced.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    /// Encoded lines for the Tx log, ending with the transaction boundary.
    pub(crate) lines: String,
    pub(crate) vertices_written: u64,
    pub(crate) vertices_removed: u64,
    pub(crate) edges_written: u64,
    pub(crate) edges_removed: u64,
}

/// Authoritative in-memory graph.
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    pub(crate) vertices: HashMap<VertexId, Stored<VertexRecord>>,
    pub(crate) edges: HashMap<EdgeId, Stored<EdgeRecord>>,
    pub(crate) adjacency: AdjacencyIndex,
    pub(crate) indexes: IndexSet,
    /// Ids erased by commits that may not be durable yet, with their commit seq.
    pub(crate) erased: HashMap<Uuid, u64>,
}

impl GraphState {
    pub(crate) fn vertex(&self, id: VertexId) -> Option<VertexRecord> {
        self.vertices.get(&id).map(|s| s.record.clone())
    }

    pub(crate) fn edge(&self, id: EdgeId) -> Option<EdgeRecord> {
        self.edges.get(&id).map(|s| s.record.clone())
    }

    pub(crate) fn edge_ids(&self, vertex: VertexId, dir: Dir, labels: &[&str]) -> Vec<EdgeId> {
        self.adjacency.edges(vertex, dir, labels)
    }

    pub(crate) fn edges_of(&self, vertex: VertexId, dir: Dir, labels: &[&str]) -> Vec<EdgeRecord> {
        self.adjacency
            .edges(vertex, dir, labels)
            .into_iter()
            .filter_map(|id| self.edge(id))
            .collect()
    }

    pub(crate) fn lookup_vertices(
        &self,
        key: &str,
        value: &PropertyValue,
        allow_scan: bool,
    ) -> Result<Vec<VertexRecord>> {
        if let Some(ids) = self.indexes.lookup(ElementKind::Vertex, key, value) {
            return Ok(ids
                .into_iter()
                .filter_map(|id| self.vertex(VertexId(id)))
                .collect());
        }
        if !allow_scan {
            return Err(BitsyError::MissingIndex(key.to_owned()));
        }
        Ok(self
            .vertices
            .values()
            .filter(|s| s.record.property(key) == Some(value))
            .map(|s| s.record.clone())
            .collect())
    }

    pub(crate) fn lookup_edges(
        &self,
        key: &str,
        value: &PropertyValue,
        allow_scan: bool,
    ) -> Result<Vec<EdgeRecord>> {
        if let Some(ids) = self.indexes.lookup(ElementKind::Edge, key, value) {
            return Ok(ids
                .into_iter()
                .filter_map(|id| self.edge(EdgeId(id)))
                .collect());
        }
        if !allow_scan {
            return Err(BitsyError::MissingIndex(key.to_owned()));
        }
        Ok(self
            .edges
            .values()
            .filter(|s| s.record.property(key) == Some(value))
            .map(|s| s.record.clone())
            .collect())
    }

    /// Checks every changed element against the stored version and rejects
    /// labels and properties that could not be loaded back.
    pub(crate) fn validate(&self, changes: &ChangeSet) -> Result<()> {
        let mut deleted_vertices = HashSet::new();
        let mut created_vertices = HashSet::new();
        for vertex in &changes.vertices {
            if vertex.state == ElementState::Unmodified {
                continue;
            }
            validate_properties(&vertex.properties)?;
            let stored = self
                .vertices
                .get(&vertex.id)
                .map(|s| s.record.version)
                .unwrap_or(0);
            if vertex.version != stored + 1 {
                return Err(BitsyError::Conflict(format!(
                    "vertex {} was changed to version {} by another transaction (expected {})",
                    vertex.id,
                    stored,
                    vertex.version.saturating_sub(1)
                )));
            }
            if vertex.state.is_deleted() {
                deleted_vertices.insert(vertex.id);
            } else {
                created_vertices.insert(vertex.id);
            }
        }
        for edge in &changes.edges {
            if edge.state == ElementState::Unmodified {
                continue;
            }
            validate_edge_label(&edge.label)?;
            validate_properties(&edge.properties)?;
            let stored = self.edges.get(&edge.id).map(|s| &s.record);
            let stored_version = stored.map(|e| e.version).unwrap_or(0);
            if edge.version != stored_version + 1 {
                return Err(BitsyError::Conflict(format!(
                    "edge {} was changed to version {} by another transaction (expected {})",
                    edge.id,
                    stored_version,
                    edge.version.saturating_sub(1)
                )));
            }
            if edge.state.is_deleted() {
                continue;
            }
            if deleted_vertices.contains(&edge.out_vertex) {
                return Err(BitsyError::DeletedOutVertex(edge.out_vertex));
            }
            if deleted_vertices.contains(&edge.in_vertex) {
                return Err(BitsyError::DeletedInVertex(edge.in_vertex));
            }
            if let Some(existing) = stored {
                if existing.out_vertex != edge.out_vertex
                    || existing.in_vertex != edge.in_vertex
                    || existing.label != edge.label
                {
                    return Err(BitsyError::Invalid(
                        "edge endpoints and label cannot change",
                    ));
                }
                continue;
            }
            for endpoint in [edge.out_vertex, edge.in_vertex] {
                if !self.vertices.contains_key(&endpoint) && !created_vertices.contains(&endpoint) {
                    return Err(BitsyError::Conflict(format!(
                        "vertex {endpoint} of new edge {} no longer exists",
                        edge.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies a validated change set as commit `seq`. Vertices first, then
    /// edges; removing a vertex also removes every incident edge not already
    /// part of the change set.
    ///
    /// All lines are encoded before the maps change, so an encoding error
    /// leaves the state untouched.
    pub(crate) fn apply(&mut self, changes: &ChangeSet, seq: u64) -> Result<Applied> {
        let mut applied = Applied::default();
        let in_set: HashSet<EdgeId> = changes.edges.iter().map(|e| e.id).collect();
        let mut cascaded = Vec::new();
        let mut seen = HashSet::new();

        for vertex in &changes.vertices {
            if vertex.state == ElementState::Unmodified {
                continue;
            }
            applied.lines.push_str(&codec::encode_vertex(vertex)?);
            if !vertex.state.is_deleted() {
                continue;
            }
            for edge_id in self.adjacency.incident(vertex.id) {
                if in_set.contains(&edge_id) || !seen.insert(edge_id) {
                    continue;
                }
                if let Some(stored) = self.edges.get(&edge_id) {
                    let mut edge = stored.record.clone();
                    edge.version += 1;
                    edge.state = ElementState::Deleted;
                    applied.lines.push_str(&codec::encode_edge(&edge)?);
                    cascaded.push(edge_id);
                }
            }
        }
        for edge in &changes.edges {
            if edge.state != ElementState::Unmodified {
                applied.lines.push_str(&codec::encode_edge(edge)?);
            }
        }
        applied
            .lines
            .push_str(&LogRecord::tx_boundary(seq).encode());

        for vertex in &changes.vertices {
            match vertex.state {
                ElementState::Unmodified => continue,
                ElementState::Deleted => {
                    if let Some(old) = self.vertices.remove(&vertex.id) {
                        self.indexes.update_vertex(Some(&old.record), None);
                    }
                    self.erased.insert(vertex.id.0, seq);
                    applied.vertices_removed += 1;
                }
                ElementState::Modified => {
                    let mut record = vertex.clone();
                    record.state = ElementState::Unmodified;
                    let old = self.vertices.get(&record.id).map(|s| s.record.clone());
                    self.indexes.update_vertex(old.as_ref(), Some(&record));
                    self.vertices.insert(record.id, Stored { record, seq });
                    applied.vertices_written += 1;
                }
            }
        }
        for edge_id in cascaded {
            if self.erase_edge(edge_id, seq).is_some() {
                applied.edges_removed += 1;
            }
        }

        for edge in &changes.edges {
            match edge.state {
                ElementState::Unmodified => continue,
                ElementState::Deleted => {
                    self.erase_edge(edge.id, seq);
                    applied.edges_removed += 1;
                }
                ElementState::Modified => {
                    let mut record = edge.clone();
                    record.state = ElementState::Unmodified;
                    let old = self.edges.get(&record.id).map(|s| s.record.clone());
                    if old.is_none() {
                        self.adjacency.insert(&record);
                    }
                    self.indexes.update_edge(old.as_ref(), Some(&record));
                    self.edges.insert(record.id, Stored { record, seq });
                    applied.edges_written += 1;
                }
            }
        }
        Ok(applied)
    }

    fn erase_edge(&mut self, id: EdgeId, seq: u64) -> Option<EdgeRecord> {
        self.erased.insert(id.0, seq);
        let old = self.edges.remove(&id)?;
        self.adjacency.remove(&old.record);
        self.indexes.update_edge(Some(&old.record), None);
        Some(old.record)
    }

    /// Forgets erasures that are already durable.
    pub(crate) fn prune_erased(&mut self, durable: u64) {
        self.erased.retain(|_, seq| *seq > durable);
    }

    /// Whether a logged element line no longer needs to be kept.
    ///
    /// A line superseded by a newer version or by an erasure is only dropped
    /// once that superseding commit is durable. Tombstones are dropped only
    /// when `reorg` is set.
    pub(crate) fn is_obsolete(&self, stamp: &ElementStamp, reorg: bool, durable: u64) -> bool {
        if stamp.deleted {
            return reorg;
        }
        let current = match stamp.kind {
            ElementKind::Vertex => self
                .vertices
                .get(&VertexId(stamp.id))
                .map(|s| (s.record.version, s.seq)),
            ElementKind::Edge => self
                .edges
                .get(&EdgeId(stamp.id))
                .map(|s| (s.record.version, s.seq)),
        };
        match current {
            Some((version, _)) if version == stamp.version => false,
            Some((_, seq)) => seq <= durable,
            None => match self.erased.get(&stamp.id) {
                Some(seq) => *seq <= durable,
                None => true,
            },
        }
    }

    /// Rebuilds adjacency from the edge map and fills the given indexes.
    pub(crate) fn rebuild_derived(&mut self, defs: &[IndexDef]) {
        self.adjacency.clear();
        for stored in self.edges.values() {
            self.adjacency.insert(&stored.record);
        }
        for def in defs {
            self.create_index(def.kind, &def.key);
        }
    }

    pub(crate) fn create_index(&mut self, kind: ElementKind, key: &str) -> bool {
        match kind {
            ElementKind::Vertex => self.indexes.create(
                kind,
                key,
                self.vertices
                    .values()
                    .map(|s| (s.record.id.0, &s.record.properties)),
            ),
            ElementKind::Edge => self.indexes.create(
                kind,
                key,
                self.edges
                    .values()
                    .map(|s| (s.record.id.0, &s.record.properties)),
            ),
        }
    }
}

fn validate_properties(properties: &Properties) -> Result<()> {
    for (key, value) in properties {
        validate_property_key(key)?;
        validate_property_value(value)?;
    }
    Ok(())
}
