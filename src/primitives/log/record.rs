use std::fmt;

use crate::types::checksum::{line_checksum, LINE_CHECKSUM_LEN};

/// Kind of a log line, identified by its leading type character.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// File header carrying the file counter.
    Header,
    /// Marker written after a Tx log has been copied, carrying the next
    /// Tx counter to replay.
    LogMarker,
    /// Vertex state.
    Vertex,
    /// Edge state.
    Edge,
    /// End of one committed transaction.
    TxBoundary,
    /// Key index definition.
    Index,
    /// On-disk format major version.
    MajorVersion,
}

impl RecordType {
    /// Type character used on disk.
    pub fn code(self) -> char {
        match self {
            RecordType::Header => 'H',
            RecordType::LogMarker => 'L',
            RecordType::Vertex => 'V',
            RecordType::Edge => 'E',
            RecordType::TxBoundary => 'T',
            RecordType::Index => 'I',
            RecordType::MajorVersion => 'M',
        }
    }

    /// Parses a type character.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'H' => Some(RecordType::Header),
            'L' => Some(RecordType::LogMarker),
            'V' => Some(RecordType::Vertex),
            'E' => Some(RecordType::Edge),
            'T' => Some(RecordType::TxBoundary),
            'I' => Some(RecordType::Index),
            'M' => Some(RecordType::MajorVersion),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One decoded log line: its type and raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Record type.
    pub kind: RecordType,
    /// Payload text between `=` and `#`.
    pub payload: String,
}

impl LogRecord {
    /// Creates a record from a type and payload.
    pub fn new(kind: RecordType, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Header record carrying `counter`.
    pub fn header(counter: u64) -> Self {
        Self::new(RecordType::Header, counter.to_string())
    }

    /// Log marker carrying the next Tx counter to replay.
    pub fn log_marker(next_tx_counter: u64) -> Self {
        Self::new(RecordType::LogMarker, next_tx_counter.to_string())
    }

    /// Transaction boundary for commit sequence `seq`.
    pub fn tx_boundary(seq: u64) -> Self {
        Self::new(RecordType::TxBoundary, seq.to_string())
    }

    /// Parses the payload as an unsigned counter (H, L, T and M records).
    pub fn counter(&self) -> Option<u64> {
        self.payload.parse().ok()
    }

    /// Renders the full newline-terminated line including its checksum.
    pub fn encode(&self) -> String {
        encode_line(self.kind, &self.payload)
    }
}

/// Renders `<Type>=<payload>#<checksum>\n`.
pub fn encode_line(kind: RecordType, payload: &str) -> String {
    let mut line = String::with_capacity(payload.len() + LINE_CHECKSUM_LEN + 4);
    line.push(kind.code());
    line.push('=');
    line.push_str(payload);
    line.push('#');
    let sum = line_checksum(&line);
    line.push_str(&sum);
    line.push('\n');
    line
}

/// Validates and splits a single line (without its trailing newline).
///
/// Returns a short reason on failure; callers attach the file and line.
pub fn decode_line(line: &str) -> std::result::Result<LogRecord, &'static str> {
    let mut chars = line.chars();
    let code = chars.next().ok_or("empty line")?;
    let kind = RecordType::from_code(code).ok_or("unknown record type")?;
    if chars.next() != Some('=') {
        return Err("missing '=' after record type");
    }
    let hash = line.rfind('#').ok_or("missing checksum separator")?;
    if hash < 2 {
        return Err("missing checksum separator");
    }
    let stored = &line[hash + 1..];
    if stored.len() != LINE_CHECKSUM_LEN {
        return Err("checksum has wrong length");
    }
    let prefix = &line[..=hash];
    if line_checksum(prefix) != stored {
        return Err("checksum mismatch");
    }
    Ok(LogRecord {
        kind,
        payload: line[2..hash].to_string(),
    })
}
