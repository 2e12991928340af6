use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Opaque identifier local to one dump (range, result, moniker, document ...).
pub type Id = String;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dump {
    pub id: i64,
    pub repository_id: i64,
    pub commit: String,
    pub root: String,
    pub indexer: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(start_line, start_character),
            end: Position::new(end_line, end_character),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeData {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_result_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_result_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hover_result_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moniker_ids: Vec<Id>,
}

impl RangeData {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start_line,
            start_character,
            end_line,
            end_character,
            ..Self::default()
        }
    }

    pub fn range(&self) -> Range {
        Range::new(
            self.start_line,
            self.start_character,
            self.end_line,
            self.end_character,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonikerKind {
    Import,
    Export,
    Local,
}

impl fmt::Display for MonikerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MonikerKind::Import => "import",
            MonikerKind::Export => "export",
            MonikerKind::Local => "local",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonikerData {
    pub kind: MonikerKind,
    pub scheme: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_information_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageInformationData {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticData {
    pub severity: i32,
    #[serde(default)]
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub source: String,
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentData {
    #[serde(default)]
    pub ranges: HashMap<Id, RangeData>,
    #[serde(default)]
    pub hover_results: HashMap<Id, String>,
    #[serde(default)]
    pub monikers: HashMap<Id, MonikerData>,
    #[serde(default)]
    pub package_information: HashMap<Id, PackageInformationData>,
    #[serde(default)]
    pub diagnostics: Vec<DiagnosticData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdRangeId {
    pub document_id: Id,
    pub range_id: Id,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultChunkData {
    #[serde(default)]
    pub document_paths: HashMap<Id, String>,
    #[serde(default)]
    pub document_id_range_ids: HashMap<Id, Vec<DocumentIdRangeId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    pub num_result_chunks: usize,
}

/// Which moniker table a lookup reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonikerTable {
    Definitions,
    References,
}

impl fmt::Display for MonikerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MonikerTable::Definitions => "definitions",
            MonikerTable::References => "references",
        })
    }
}

/// A bundle-relative location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub range: Range,
}

impl Location {
    pub fn new(path: impl Into<String>, range: Range) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }
}

/// Orders locations by path, then start line, then start character.
pub fn compare_locations(a: &Location, b: &Location) -> Ordering {
    a.path
        .cmp(&b.path)
        .then(a.range.start.line.cmp(&b.range.start.line))
        .then(a.range.start.character.cmp(&b.range.start.character))
}

pub fn sort_locations(locations: &mut [Location]) {
    locations.sort_by(compare_locations);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIntelligenceRange {
    pub range: Range,
    pub definitions: Vec<Location>,
    pub references: Vec<Location>,
    pub hover_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: String,
    pub severity: i32,
    pub code: String,
    pub message: String,
    pub source: String,
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

impl Diagnostic {
    pub fn from_data(path: &str, data: &DiagnosticData) -> Self {
        Self {
            path: path.to_string(),
            severity: data.severity,
            code: data.code.clone(),
            message: data.message.clone(),
            source: data.source.clone(),
            start_line: data.start_line,
            start_character: data.start_character,
            end_line: data.end_line,
            end_character: data.end_character,
        }
    }
}

/// A location re-anchored to the repository: `path` is `dump.root` + bundle path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub dump: Dump,
    pub path: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDiagnostic {
    pub dump: Dump,
    pub diagnostic: Diagnostic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCodeIntelligenceRange {
    pub range: Range,
    pub definitions: Vec<ResolvedLocation>,
    pub references: Vec<ResolvedLocation>,
    pub hover_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverResult {
    pub dump: Dump,
    pub text: String,
    pub range: Range,
}

/// A moniker at a position together with the package it belongs to, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifiedMoniker {
    #[serde(flatten)]
    pub moniker: MonikerData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageInformationData>,
}
