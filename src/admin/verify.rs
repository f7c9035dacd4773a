use std::path::Path;

use serde::Serialize;

use crate::admin::util::require_database;
use crate::admin::Result;
use crate::primitives::buffer::Slot;
use crate::primitives::log::{DurableLog, LineRead, RecordType};
use crate::storage::codec::{self, Decoded, MAJOR_VERSION};
use crate::storage::durable::files::{self, file_name, FileKind};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Headers and counters only.
    Fast,
    /// Every line of every file.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Something recovery would repair when the database is next opened.
    Warning,
    /// Corruption that would prevent the database from opening.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// File the finding refers to.
    pub file: String,
    /// Human-readable description of the issue.
    pub message: String,
}

/// What was found in one file.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FileSummary {
    /// File name inside the database directory.
    pub name: String,
    /// Header counter, `None` when missing or unreadable.
    pub counter: Option<u64>,
    /// Whether this member of its pair is the one loaded at boot.
    pub active: bool,
    /// Lines after the header.
    pub lines: u64,
    /// Vertex and edge lines.
    pub element_lines: u64,
    /// Log markers and transaction boundaries.
    pub markers: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// No finding has error severity.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// One entry per file, in directory order.
    pub files: Vec<FileSummary>,
}

/// Checks a closed database directory without modifying it.
///
/// `Fast` reads only the headers and reports which member of each pair is
/// active. `Full` also validates every line: checksums, record types allowed
/// in each file, payload shapes and the metadata major version. A bad final
/// line or content after the last commit point is a warning, since opening
/// the database truncates it; anything else is an error.
pub fn verify(dir: impl AsRef<Path>, level: VerifyLevel) -> Result<VerifyReport> {
    let layout = require_database(dir.as_ref())?;
    let mut findings = Vec::new();
    let mut summaries = Vec::new();

    for kind in FileKind::ALL {
        let counters = [Slot::A, Slot::B].map(|slot| {
            files::header_counter(&layout.path(kind, slot)).unwrap_or(None)
        });
        let active = match files::active_slot(&layout, kind, counters[0], counters[1]) {
            Ok(slot) => Some(slot),
            Err(err) => {
                push(&mut findings, VerifySeverity::Error, kind.to_string(), err.to_string());
                None
            }
        };
        for slot in [Slot::A, Slot::B] {
            let name = file_name(kind, slot);
            let mut summary = FileSummary {
                name: name.clone(),
                counter: counters[slot.index()],
                active: active == Some(slot),
                ..FileSummary::default()
            };
            if summary.counter.is_none() {
                let severity = if summary.active {
                    VerifySeverity::Error
                } else {
                    VerifySeverity::Warning
                };
                push(&mut findings, severity, name.clone(), "missing or unreadable header");
            } else if level == VerifyLevel::Full {
                scan_file(&layout.path(kind, slot), kind, &mut summary, &mut findings);
            }
            summaries.push(summary);
        }
    }

    let success = findings
        .iter()
        .all(|finding| finding.severity != VerifySeverity::Error);
    Ok(VerifyReport {
        level,
        success,
        findings,
        files: summaries,
    })
}

fn allowed(kind: FileKind, record: RecordType) -> bool {
    match kind {
        FileKind::Tx => matches!(
            record,
            RecordType::Vertex | RecordType::Edge | RecordType::TxBoundary
        ),
        FileKind::Vertex => matches!(
            record,
            RecordType::Vertex | RecordType::TxBoundary | RecordType::LogMarker
        ),
        FileKind::Edge => matches!(
            record,
            RecordType::Edge | RecordType::TxBoundary | RecordType::LogMarker
        ),
        FileKind::Meta => matches!(record, RecordType::MajorVersion | RecordType::Index),
    }
}

fn commits(kind: FileKind, record: RecordType) -> bool {
    match kind {
        FileKind::Tx => record == RecordType::TxBoundary,
        FileKind::Vertex | FileKind::Edge => record == RecordType::LogMarker,
        FileKind::Meta => true,
    }
}

fn scan_file(
    path: &Path,
    kind: FileKind,
    summary: &mut FileSummary,
    findings: &mut Vec<VerifyFinding>,
) {
    let name = summary.name.clone();
    let mut log = match DurableLog::open_read(path) {
        Ok(log) => log,
        Err(err) => {
            push(findings, VerifySeverity::Error, name, err.to_string());
            return;
        }
    };
    let mut uncommitted = 0u64;
    let mut major = None;
    loop {
        let record = match log.read_line_lenient() {
            Ok(LineRead::Record(record)) => record,
            Ok(LineRead::Eof) => break,
            Ok(LineRead::Torn { line, reason }) => {
                push(
                    findings,
                    VerifySeverity::Warning,
                    name.clone(),
                    format!("torn final line {line}: {reason}"),
                );
                break;
            }
            Err(err) => {
                push(findings, VerifySeverity::Error, name.clone(), err.to_string());
                return;
            }
        };
        let line = log.line_no();
        summary.lines += 1;
        if !allowed(kind, record.kind) {
            push(
                findings,
                VerifySeverity::Error,
                name.clone(),
                format!("line {line}: record type {} not allowed here", record.kind),
            );
            continue;
        }
        match codec::decode(&record) {
            Ok(Decoded::Vertex(_) | Decoded::Edge(_)) => summary.element_lines += 1,
            Ok(Decoded::TxBoundary(_) | Decoded::LogMarker(_)) => summary.markers += 1,
            Ok(Decoded::MajorVersion(version)) => major = Some(version),
            Ok(_) => {}
            Err(reason) => push(
                findings,
                VerifySeverity::Error,
                name.clone(),
                format!("line {line}: {reason}"),
            ),
        }
        if commits(kind, record.kind) {
            uncommitted = 0;
        } else {
            uncommitted += 1;
        }
    }
    if uncommitted > 0 {
        push(
            findings,
            VerifySeverity::Warning,
            name.clone(),
            format!("{uncommitted} trailing lines after the last commit point"),
        );
    }
    if kind == FileKind::Meta && summary.active {
        match major {
            Some(MAJOR_VERSION) => {}
            Some(other) => push(
                findings,
                VerifySeverity::Error,
                name,
                format!("unsupported major version {other}"),
            ),
            None => push(findings, VerifySeverity::Error, name, "no major version record"),
        }
    }
}

fn push(
    findings: &mut Vec<VerifyFinding>,
    severity: VerifySeverity,
    file: impl Into<String>,
    message: impl Into<String>,
) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding {
            severity,
            file: file.into(),
            message: message.into(),
        });
    }
}
