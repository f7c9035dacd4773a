use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Bound;

use uuid::Uuid;

use crate::storage::types::EdgeRecord;
use crate::types::{EdgeId, VertexId};

/// Edge direction relative to a vertex.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Dir {
    /// Edges whose out-vertex is the vertex.
    Out,
    /// Edges whose in-vertex is the vertex.
    In,
    /// Both.
    Both,
}

impl Dir {
    /// Whether outgoing edges are included.
    pub fn includes_out(self) -> bool {
        matches!(self, Dir::Out | Dir::Both)
    }

    /// Whether incoming edges are included.
    pub fn includes_in(self) -> bool {
        matches!(self, Dir::In | Dir::Both)
    }
}

/// Adjacency entry ordered by label, then edge id.
///
/// `label: None` sorts before every concrete label and is only used as a
/// lower scan bound.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    /// Edge label.
    pub label: Option<String>,
    /// Edge id.
    pub edge: EdgeId,
}

impl Endpoint {
    fn new(label: &str, edge: EdgeId) -> Self {
        Self {
            label: Some(label.to_owned()),
            edge,
        }
    }

    fn lower_bound(label: &str) -> Self {
        Self::new(label, EdgeId(Uuid::nil()))
    }
}

/// Per-vertex, per-direction ordered edge index.
#[derive(Default, Debug, Clone)]
pub struct AdjacencyIndex {
    out: HashMap<VertexId, BTreeSet<Endpoint>>,
    inc: HashMap<VertexId, BTreeSet<Endpoint>>,
}

impl AdjacencyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `edge` under both endpoints.
    pub fn insert(&mut self, edge: &EdgeRecord) {
        self.out
            .entry(edge.out_vertex)
            .or_default()
            .insert(Endpoint::new(&edge.label, edge.id));
        self.inc
            .entry(edge.in_vertex)
            .or_default()
            .insert(Endpoint::new(&edge.label, edge.id));
    }

    /// Unregisters `edge` from both endpoints.
    pub fn remove(&mut self, edge: &EdgeRecord) {
        let entry = Endpoint::new(&edge.label, edge.id);
        remove_entry(&mut self.out, edge.out_vertex, &entry);
        remove_entry(&mut self.inc, edge.in_vertex, &entry);
    }

    /// Edge ids incident to `vertex` in `dir`, restricted to `labels` unless
    /// it is empty. Self-loops are reported once.
    pub fn edges(&self, vertex: VertexId, dir: Dir, labels: &[&str]) -> Vec<EdgeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |set: &BTreeSet<Endpoint>| {
            if labels.is_empty() {
                for entry in set {
                    if seen.insert(entry.edge) {
                        out.push(entry.edge);
                    }
                }
                return;
            }
            for label in labels {
                let lower = Endpoint::lower_bound(label);
                for entry in set
                    .range((Bound::Included(lower), Bound::Unbounded))
                    .take_while(|e| e.label.as_deref() == Some(*label))
                {
                    if seen.insert(entry.edge) {
                        out.push(entry.edge);
                    }
                }
            }
        };
        if dir.includes_out() {
            if let Some(set) = self.out.get(&vertex) {
                push(set);
            }
        }
        if dir.includes_in() {
            if let Some(set) = self.inc.get(&vertex) {
                push(set);
            }
        }
        out
    }

    /// Every edge touching `vertex`.
    pub fn incident(&self, vertex: VertexId) -> Vec<EdgeId> {
        self.edges(vertex, Dir::Both, &[])
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.out.clear();
        self.inc.clear();
    }
}

fn remove_entry(map: &mut HashMap<VertexId, BTreeSet<Endpoint>>, vertex: VertexId, entry: &Endpoint) {
    if let Some(set) = map.get_mut(&vertex) {
        set.remove(entry);
        if set.is_empty() {
            map.remove(&vertex);
        }
    }
}
