use std::path::Path;
use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::admin::Result;
use crate::storage::{GraphStore, StoreOptions};
use crate::types::VertexId;

/// Shape of a generated social graph.
#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    /// Number of `user` vertices.
    pub users: usize,
    /// Average outgoing `follows` edges per user.
    pub avg_follows: usize,
    /// Vertices or edges written per transaction.
    pub batch: usize,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            users: 100,
            avg_follows: 3,
            batch: 256,
        }
    }
}

/// Outcome of [`seed`].
#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    /// Database directory.
    pub path: String,
    /// Vertices created.
    pub vertices: u64,
    /// Edges created.
    pub edges: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u128,
}

/// Populates `dir` (creating the database when needed) with random users
/// and `follows` edges, then flushes the Tx log.
pub fn seed(dir: impl AsRef<Path>, seed_opts: SeedOptions, opts: StoreOptions) -> Result<SeedReport> {
    let started = Instant::now();
    let dir = dir.as_ref();
    let store = GraphStore::open(dir, opts)?;
    let mut rng = rand::thread_rng();
    let batch = seed_opts.batch.max(1);
    let mut commits = 0u64;

    let mut users: Vec<VertexId> = Vec::with_capacity(seed_opts.users);
    while users.len() < seed_opts.users {
        let mut tx = store.new_transaction();
        let end = (users.len() + batch).min(seed_opts.users);
        for n in users.len()..end {
            let id = tx.add_vertex(Some("user"))?;
            tx.set_vertex_property(id, "name", format!("user{}", n + 1))?;
            tx.set_vertex_property(id, "age", rng.gen_range(18i64..65))?;
            tx.set_vertex_property(id, "active", rng.gen_bool(0.8))?;
            tx.set_vertex_property(id, "score", rng.gen_range(0.0f64..1000.0))?;
            users.push(id);
        }
        tx.commit()?;
        commits += 1;
    }

    let mut edges = 0u64;
    if users.len() > 1 {
        let mut pending = 0usize;
        let mut tx = store.new_transaction();
        for (n, &from) in users.iter().enumerate() {
            for _ in 0..rng.gen_range(0..=seed_opts.avg_follows * 2) {
                let target = rng.gen_range(0..users.len());
                if target == n {
                    continue;
                }
                let edge = tx.add_edge(from, users[target], "follows")?;
                tx.set_edge_property(edge, "weight", rng.gen_range(1i64..10))?;
                edges += 1;
                pending += 1;
                if pending == batch {
                    tx.commit()?;
                    commits += 1;
                    pending = 0;
                    tx = store.new_transaction();
                }
            }
        }
        if pending > 0 {
            tx.commit()?;
            commits += 1;
        } else {
            tx.rollback()?;
        }
    }

    store.flush_tx_log()?;
    store.shutdown()?;
    info!(dir = %dir.display(), vertices = users.len(), edges, "admin.seed");
    Ok(SeedReport {
        path: dir.display().to_string(),
        vertices: users.len() as u64,
        edges,
        commits,
        duration_ms: started.elapsed().as_millis(),
    })
}
