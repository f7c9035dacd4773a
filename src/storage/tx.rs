//! Client-side transactions over a [`GraphStore`].
//!
//! A transaction buffers every change locally and submits the whole change
//! set at commit. Reads see the transaction's own changes first; under
//! [`IsolationLevel::RepeatableRead`] the first committed snapshot read of
//! each element is pinned for the rest of the transaction.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::adjacency::{AdjacencyIndex, Dir};
use crate::storage::graph::{ChangeSet, GraphStore};
use crate::storage::types::{
    validate_edge_label, validate_property_key, validate_property_value, EdgeRecord,
    ElementState, PropertyValue, VertexRecord,
};
use crate::types::{BitsyError, EdgeId, Result, VertexId};

/// How reads of committed state behave inside a transaction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Every read fetches the latest committed state.
    #[default]
    ReadCommitted,
    /// The first read of an element is cached and reused. Adjacency is not
    /// pinned; see [`Transaction::get_edges`].
    RepeatableRead,
}

/// Lifecycle of a [`Transaction`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Accepting reads and writes.
    Open,
    /// Handing the change set to the store.
    Committing,
    /// Committed or rolled back; every operation fails.
    Closed,
}

/// A unit of work against a [`GraphStore`].
///
/// Dropping an open transaction rolls it back.
pub struct Transaction<'s> {
    store: &'s GraphStore,
    isolation: IsolationLevel,
    state: TxState,
    vertices: HashMap<VertexId, VertexRecord>,
    edges: HashMap<EdgeId, EdgeRecord>,
    created_vertices: HashSet<VertexId>,
    created_edges: HashSet<EdgeId>,
    vertex_cache: HashMap<VertexId, Option<VertexRecord>>,
    edge_cache: HashMap<EdgeId, Option<EdgeRecord>>,
    shadow: AdjacencyIndex,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new(store: &'s GraphStore, isolation: IsolationLevel) -> Self {
        Self {
            store,
            isolation,
            state: TxState::Open,
            vertices: HashMap::new(),
            edges: HashMap::new(),
            created_vertices: HashSet::new(),
            created_edges: HashSet::new(),
            vertex_cache: HashMap::new(),
            edge_cache: HashMap::new(),
            shadow: AdjacencyIndex::new(),
        }
    }

    /// Isolation level this transaction runs with.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Returns `true` until commit or rollback.
    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BitsyError::AccessOutsideScope)
        }
    }

    fn committed_vertex(&mut self, id: VertexId) -> Option<VertexRecord> {
        match self.isolation {
            IsolationLevel::ReadCommitted => self.store.get_vertex(id),
            IsolationLevel::RepeatableRead => {
                let store = self.store;
                self.vertex_cache
                    .entry(id)
                    .or_insert_with(|| store.get_vertex(id))
                    .clone()
            }
        }
    }

    fn committed_edge(&mut self, id: EdgeId) -> Option<EdgeRecord> {
        match self.isolation {
            IsolationLevel::ReadCommitted => self.store.get_edge(id),
            IsolationLevel::RepeatableRead => {
                let store = self.store;
                self.edge_cache
                    .entry(id)
                    .or_insert_with(|| store.get_edge(id))
                    .clone()
            }
        }
    }

    /// The vertex as this transaction sees it.
    pub fn get_vertex(&mut self, id: VertexId) -> Result<Option<VertexRecord>> {
        self.ensure_open()?;
        if let Some(vertex) = self.vertices.get(&id) {
            return Ok((!vertex.state.is_deleted()).then(|| vertex.clone()));
        }
        Ok(self.committed_vertex(id))
    }

    /// The edge as this transaction sees it.
    pub fn get_edge(&mut self, id: EdgeId) -> Result<Option<EdgeRecord>> {
        self.ensure_open()?;
        if let Some(edge) = self.edges.get(&id) {
            return Ok((!edge.state.is_deleted()).then(|| edge.clone()));
        }
        Ok(self.committed_edge(id))
    }

    /// Edges incident to `vertex`, including ones added by this transaction
    /// and excluding ones it removed.
    ///
    /// Under [`IsolationLevel::RepeatableRead`] only the edge records are
    /// pinned; the ids come from the latest committed adjacency. An edge
    /// committed elsewhere after this transaction started is listed, and an
    /// edge removed elsewhere drops out even if it was read before.
    pub fn get_edges(
        &mut self,
        vertex: VertexId,
        dir: Dir,
        labels: &[&str],
    ) -> Result<Vec<EdgeRecord>> {
        self.ensure_open()?;
        let mut ids = self.store.get_edge_ids(vertex, dir, labels);
        ids.extend(self.shadow.edges(vertex, dir, labels));
        let mut seen = HashSet::with_capacity(ids.len());
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            if let Some(edge) = self.get_edge(id)? {
                out.push(edge);
            }
        }
        Ok(out)
    }

    /// Every vertex visible to this transaction.
    pub fn vertices(&mut self) -> Result<Vec<VertexRecord>> {
        self.ensure_open()?;
        let mut out: Vec<VertexRecord> = self
            .store
            .all_vertices()
            .into_iter()
            .filter(|v| !self.vertices.contains_key(&v.id))
            .collect();
        out.extend(
            self.vertices
                .values()
                .filter(|v| !v.state.is_deleted())
                .cloned(),
        );
        Ok(out)
    }

    /// Every edge visible to this transaction.
    pub fn edges(&mut self) -> Result<Vec<EdgeRecord>> {
        self.ensure_open()?;
        let mut out: Vec<EdgeRecord> = self
            .store
            .all_edges()
            .into_iter()
            .filter(|e| !self.edges.contains_key(&e.id))
            .collect();
        out.extend(self.edges.values().filter(|e| !e.state.is_deleted()).cloned());
        Ok(out)
    }

    /// Vertices whose `key` equals `value`, merged with this transaction's changes.
    pub fn lookup_vertices(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<Vec<VertexRecord>> {
        self.ensure_open()?;
        let mut out: Vec<VertexRecord> = self
            .store
            .lookup_vertices(key, value)?
            .into_iter()
            .filter(|v| !self.vertices.contains_key(&v.id))
            .collect();
        out.extend(
            self.vertices
                .values()
                .filter(|v| !v.state.is_deleted() && v.property(key) == Some(value))
                .cloned(),
        );
        Ok(out)
    }

    /// Edges whose `key` equals `value`, merged with this transaction's changes.
    pub fn lookup_edges(&mut self, key: &str, value: &PropertyValue) -> Result<Vec<EdgeRecord>> {
        self.ensure_open()?;
        let mut out: Vec<EdgeRecord> = self
            .store
            .lookup_edges(key, value)?
            .into_iter()
            .filter(|e| !self.edges.contains_key(&e.id))
            .collect();
        out.extend(
            self.edges
                .values()
                .filter(|e| !e.state.is_deleted() && e.property(key) == Some(value))
                .cloned(),
        );
        Ok(out)
    }

    /// Creates a vertex and returns its id.
    pub fn add_vertex(&mut self, label: Option<&str>) -> Result<VertexId> {
        self.ensure_open()?;
        let vertex = VertexRecord::new(VertexId::random(), label.map(str::to_owned));
        let id = vertex.id;
        self.created_vertices.insert(id);
        self.vertices.insert(id, vertex);
        Ok(id)
    }

    fn vertex_for_update(&mut self, id: VertexId) -> Result<&mut VertexRecord> {
        self.ensure_open()?;
        if !self.vertices.contains_key(&id) {
            let mut vertex = self
                .committed_vertex(id)
                .ok_or(BitsyError::VertexNotFound(id))?;
            vertex.version += 1;
            vertex.state = ElementState::Modified;
            self.vertices.insert(id, vertex);
        }
        match self.vertices.get_mut(&id) {
            Some(vertex) if !vertex.state.is_deleted() => Ok(vertex),
            _ => Err(BitsyError::VertexNotFound(id)),
        }
    }

    fn edge_for_update(&mut self, id: EdgeId) -> Result<&mut EdgeRecord> {
        self.ensure_open()?;
        if !self.edges.contains_key(&id) {
            let mut edge = self
                .committed_edge(id)
                .ok_or(BitsyError::EdgeNotFound(id))?;
            edge.version += 1;
            edge.state = ElementState::Modified;
            self.edges.insert(id, edge);
        }
        match self.edges.get_mut(&id) {
            Some(edge) if !edge.state.is_deleted() => Ok(edge),
            _ => Err(BitsyError::EdgeNotFound(id)),
        }
    }

    /// Sets or clears a vertex label.
    pub fn set_vertex_label(&mut self, id: VertexId, label: Option<&str>) -> Result<()> {
        self.vertex_for_update(id)?.label = label.map(str::to_owned);
        Ok(())
    }

    /// Sets a vertex property.
    pub fn set_vertex_property(
        &mut self,
        id: VertexId,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        validate_property_key(key)?;
        let value = value.into();
        validate_property_value(&value)?;
        self.vertex_for_update(id)?
            .properties
            .insert(key.to_owned(), value);
        Ok(())
    }

    /// Removes a vertex property, returning its previous value.
    pub fn remove_vertex_property(
        &mut self,
        id: VertexId,
        key: &str,
    ) -> Result<Option<PropertyValue>> {
        validate_property_key(key)?;
        Ok(self.vertex_for_update(id)?.properties.remove(key))
    }

    /// Removes a vertex and every edge touching it.
    pub fn remove_vertex(&mut self, id: VertexId) -> Result<()> {
        self.ensure_open()?;
        if self.get_vertex(id)?.is_none() {
            return Err(BitsyError::VertexNotFound(id));
        }
        for edge in self.get_edges(id, Dir::Both, &[])? {
            self.remove_edge(edge.id)?;
        }
        if self.created_vertices.remove(&id) {
            self.vertices.remove(&id);
        } else {
            self.vertex_for_update(id)?.state = ElementState::Deleted;
        }
        Ok(())
    }

    /// Creates an edge from `out_vertex` to `in_vertex` and returns its id.
    pub fn add_edge(
        &mut self,
        out_vertex: VertexId,
        in_vertex: VertexId,
        label: &str,
    ) -> Result<EdgeId> {
        self.ensure_open()?;
        validate_edge_label(label)?;
        if self.deleted_here(out_vertex) {
            return Err(BitsyError::DeletedOutVertex(out_vertex));
        }
        if self.deleted_here(in_vertex) {
            return Err(BitsyError::DeletedInVertex(in_vertex));
        }
        for endpoint in [out_vertex, in_vertex] {
            if self.get_vertex(endpoint)?.is_none() {
                return Err(BitsyError::VertexNotFound(endpoint));
            }
        }
        let edge = EdgeRecord::new(EdgeId::random(), label.to_owned(), out_vertex, in_vertex);
        let id = edge.id;
        self.shadow.insert(&edge);
        self.created_edges.insert(id);
        self.edges.insert(id, edge);
        Ok(id)
    }

    fn deleted_here(&self, id: VertexId) -> bool {
        self.vertices
            .get(&id)
            .is_some_and(|vertex| vertex.state.is_deleted())
    }

    /// Removes an edge.
    pub fn remove_edge(&mut self, id: EdgeId) -> Result<()> {
        self.ensure_open()?;
        if self.created_edges.remove(&id) {
            if let Some(edge) = self.edges.remove(&id) {
                self.shadow.remove(&edge);
            }
            return Ok(());
        }
        self.edge_for_update(id)?.state = ElementState::Deleted;
        Ok(())
    }

    /// Sets an edge property.
    pub fn set_edge_property(
        &mut self,
        id: EdgeId,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        validate_property_key(key)?;
        let value = value.into();
        validate_property_value(&value)?;
        self.edge_for_update(id)?
            .properties
            .insert(key.to_owned(), value);
        Ok(())
    }

    /// Removes an edge property, returning its previous value.
    pub fn remove_edge_property(&mut self, id: EdgeId, key: &str) -> Result<Option<PropertyValue>> {
        validate_property_key(key)?;
        Ok(self.edge_for_update(id)?.properties.remove(key))
    }

    /// Submits every change to the store. The transaction is closed whether
    /// or not the commit succeeds; retry a conflict with a new transaction.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TxState::Committing;
        let changes = ChangeSet {
            vertices: self.vertices.drain().map(|(_, v)| v).collect(),
            edges: self.edges.drain().map(|(_, e)| e).collect(),
        };
        debug!(
            vertices = changes.vertices.len(),
            edges = changes.edges.len(),
            "tx.commit"
        );
        let outcome = self.store.commit(&changes);
        self.close();
        outcome
    }

    /// Discards every change.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.close();
        Ok(())
    }

    fn close(&mut self) {
        self.vertices.clear();
        self.edges.clear();
        self.created_vertices.clear();
        self.created_edges.clear();
        self.vertex_cache.clear();
        self.edge_cache.clear();
        self.shadow.clear();
        self.state = TxState::Closed;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}
