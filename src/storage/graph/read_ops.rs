use super::GraphStore;
use crate::storage::adjacency::Dir;
use crate::storage::types::{EdgeRecord, VertexRecord};
use crate::types::{EdgeId, VertexId};

impl GraphStore {
    /// Committed state of a vertex.
    pub fn get_vertex(&self, id: VertexId) -> Option<VertexRecord> {
        self.core.state.read(|state| state.vertex(id))
    }

    /// Committed state of an edge.
    pub fn get_edge(&self, id: EdgeId) -> Option<EdgeRecord> {
        self.core.state.read(|state| state.edge(id))
    }

    /// Edges incident to `vertex` in direction `dir`. An empty `labels`
    /// slice matches every label.
    pub fn get_edges(&self, vertex: VertexId, dir: Dir, labels: &[&str]) -> Vec<EdgeRecord> {
        self.core
            .state
            .read(|state| state.edges_of(vertex, dir, labels))
    }

    /// Ids of the edges [`get_edges`](Self::get_edges) would return.
    pub fn get_edge_ids(&self, vertex: VertexId, dir: Dir, labels: &[&str]) -> Vec<EdgeId> {
        self.core
            .state
            .read(|state| state.edge_ids(vertex, dir, labels))
    }

    /// Every committed vertex, in no particular order.
    pub fn all_vertices(&self) -> Vec<VertexRecord> {
        self.core.state.read(|state| {
            state
                .vertices
                .values()
                .map(|stored| stored.record.clone())
                .collect()
        })
    }

    /// Every committed edge, in no particular order.
    pub fn all_edges(&self) -> Vec<EdgeRecord> {
        self.core.state.read(|state| {
            state
                .edges
                .values()
                .map(|stored| stored.record.clone())
                .collect()
        })
    }
}
