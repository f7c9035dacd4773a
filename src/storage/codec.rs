//! Typed payloads for `V`, `E`, `I` and `M` records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::primitives::log::{encode_line, LogRecord, RecordType};
use crate::storage::types::{EdgeRecord, ElementKind, ElementState, Properties, VertexRecord};
use crate::types::{BitsyError, EdgeId, Result, VertexId};

/// On-disk format major version written to the metadata file.
pub const MAJOR_VERSION: u64 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum StateCode {
    #[serde(rename = "M")]
    Live,
    #[serde(rename = "D")]
    Deleted,
}

impl StateCode {
    fn of(state: ElementState) -> Self {
        if state.is_deleted() {
            StateCode::Deleted
        } else {
            StateCode::Live
        }
    }

    fn state(self) -> ElementState {
        match self {
            StateCode::Live => ElementState::Modified,
            StateCode::Deleted => ElementState::Deleted,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct VertexWire {
    id: VertexId,
    v: u64,
    s: StateCode,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    p: Properties,
    l: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct EdgeWire {
    id: EdgeId,
    v: u64,
    s: StateCode,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    p: Properties,
    l: Option<String>,
    o: VertexId,
    i: VertexId,
}

#[derive(Serialize, Deserialize)]
struct IndexWire {
    #[serde(rename = "type")]
    kind: u8,
    key: String,
}

#[derive(Deserialize)]
struct StampWire {
    id: Uuid,
    v: u64,
    s: StateCode,
}

/// A key index definition as stored in the metadata file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexDef {
    /// Element family.
    pub kind: ElementKind,
    /// Property key.
    pub key: String,
}

/// Identity of an element line: enough to decide whether it is still current.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElementStamp {
    /// Vertex or edge.
    pub kind: ElementKind,
    /// Element id.
    pub id: Uuid,
    /// Version carried by the line.
    pub version: u64,
    /// Whether the line is a tombstone.
    pub deleted: bool,
}

/// Fully decoded record.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// `H` record.
    Header(u64),
    /// `L` record.
    LogMarker(u64),
    /// `T` record.
    TxBoundary(u64),
    /// `M` record.
    MajorVersion(u64),
    /// `I` record.
    Index(IndexDef),
    /// `V` record.
    Vertex(VertexRecord),
    /// `E` record.
    Edge(EdgeRecord),
}

/// Encodes a vertex line.
pub fn encode_vertex(vertex: &VertexRecord) -> Result<String> {
    let wire = VertexWire {
        id: vertex.id,
        v: vertex.version,
        s: StateCode::of(vertex.state),
        p: vertex.properties.clone(),
        l: vertex.label.clone(),
    };
    Ok(encode_line(RecordType::Vertex, &to_json(&wire)?))
}

/// Encodes an edge line.
pub fn encode_edge(edge: &EdgeRecord) -> Result<String> {
    let wire = EdgeWire {
        id: edge.id,
        v: edge.version,
        s: StateCode::of(edge.state),
        p: edge.properties.clone(),
        l: Some(edge.label.clone()),
        o: edge.out_vertex,
        i: edge.in_vertex,
    };
    Ok(encode_line(RecordType::Edge, &to_json(&wire)?))
}

/// Encodes an index definition line.
pub fn encode_index(def: &IndexDef) -> Result<String> {
    let wire = IndexWire {
        kind: def.kind.code(),
        key: def.key.clone(),
    };
    Ok(encode_line(RecordType::Index, &to_json(&wire)?))
}

/// Encodes the major version line.
pub fn encode_major_version() -> String {
    encode_line(RecordType::MajorVersion, &MAJOR_VERSION.to_string())
}

fn to_json<T: Serialize>(wire: &T) -> Result<String> {
    serde_json::to_string(wire)
        .map_err(|err| BitsyError::InvalidOwned(format!("cannot encode record payload: {err}")))
}

/// Decodes a record's payload according to its type.
pub fn decode(record: &LogRecord) -> std::result::Result<Decoded, &'static str> {
    match record.kind {
        RecordType::Header => counter(record).map(Decoded::Header),
        RecordType::LogMarker => counter(record).map(Decoded::LogMarker),
        RecordType::TxBoundary => counter(record).map(Decoded::TxBoundary),
        RecordType::MajorVersion => counter(record).map(Decoded::MajorVersion),
        RecordType::Index => {
            let wire: IndexWire =
                serde_json::from_str(&record.payload).map_err(|_| "malformed index payload")?;
            let kind = ElementKind::from_code(wire.kind).ok_or("unknown index element type")?;
            Ok(Decoded::Index(IndexDef {
                kind,
                key: wire.key,
            }))
        }
        RecordType::Vertex => {
            let wire: VertexWire =
                serde_json::from_str(&record.payload).map_err(|_| "malformed vertex payload")?;
            Ok(Decoded::Vertex(VertexRecord {
                id: wire.id,
                label: wire.l,
                properties: wire.p,
                version: wire.v,
                state: wire.s.state(),
            }))
        }
        RecordType::Edge => {
            let wire: EdgeWire =
                serde_json::from_str(&record.payload).map_err(|_| "malformed edge payload")?;
            let label = wire.l.filter(|l| !l.is_empty()).ok_or("edge without label")?;
            Ok(Decoded::Edge(EdgeRecord {
                id: wire.id,
                label,
                out_vertex: wire.o,
                in_vertex: wire.i,
                properties: wire.p,
                version: wire.v,
                state: wire.s.state(),
            }))
        }
    }
}

/// Reads only the id, version and state of a `V` or `E` record.
pub fn stamp(record: &LogRecord) -> std::result::Result<ElementStamp, &'static str> {
    let kind = match record.kind {
        RecordType::Vertex => ElementKind::Vertex,
        RecordType::Edge => ElementKind::Edge,
        _ => return Err("not an element record"),
    };
    let wire: StampWire =
        serde_json::from_str(&record.payload).map_err(|_| "malformed element payload")?;
    Ok(ElementStamp {
        kind,
        id: wire.id,
        version: wire.v,
        deleted: wire.s == StateCode::Deleted,
    })
}

fn counter(record: &LogRecord) -> std::result::Result<u64, &'static str> {
    record.counter().ok_or("counter payload is not a number")
}
