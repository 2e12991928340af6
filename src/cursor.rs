//! Resumable state of a cross-dump reference search.
//!
//! A cursor names the phase the search is in and everything needed to resume
//! it: the moniker identity being followed, the batch of dumps being visited
//! and the skip offsets within that batch. Callers hold it as an opaque
//! token: url-safe base64 over a versioned JSON envelope.

use crate::error::{Error, Result};
use crate::model::MonikerData;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

const CURSOR_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum Cursor {
    /// References from the dump the search started in.
    SameDump(PositionCursor),
    /// Moniker references recorded in the starting dump itself.
    SameDumpMonikers(PositionCursor),
    /// References found in the dump that defines an imported package.
    DefinitionMonikers(MonikerCursor),
    /// Dumps of the same repository that reference the package.
    SameRepo(PackageCursor),
    /// Dumps of every other repository that reference the package.
    RemoteRepo(PackageCursor),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCursor {
    pub dump_id: i64,
    pub path: String,
    pub line: u32,
    pub character: u32,
    #[serde(default)]
    pub monikers: Vec<MonikerData>,
    #[serde(default)]
    pub skip_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonikerCursor {
    pub dump_id: i64,
    pub path: String,
    #[serde(default)]
    pub monikers: Vec<MonikerData>,
    #[serde(default)]
    pub skip_results: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCursor {
    pub dump_id: i64,
    pub scheme: String,
    pub identifier: String,
    pub name: String,
    pub version: String,
    /// The current batch of referencing dumps; empty until a batch is fetched.
    #[serde(default)]
    pub dump_ids: Vec<i64>,
    #[serde(default)]
    pub total_dumps_when_batching: usize,
    /// Pager offset of the next batch.
    #[serde(default)]
    pub skip_dumps_when_batching: usize,
    #[serde(default)]
    pub skip_dumps_in_batch: usize,
    #[serde(default)]
    pub skip_results_in_dump: usize,
}

impl PackageCursor {
    /// Same moniker identity, fresh batch state.
    pub fn restart(&self) -> Self {
        Self {
            dump_id: self.dump_id,
            scheme: self.scheme.clone(),
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u32,
    cursor: &'a Cursor,
}

#[derive(Deserialize)]
struct Envelope {
    v: u32,
    cursor: serde_json::Value,
}

impl Cursor {
    pub fn phase(&self) -> &'static str {
        match self {
            Cursor::SameDump(_) => "same-dump",
            Cursor::SameDumpMonikers(_) => "same-dump-monikers",
            Cursor::DefinitionMonikers(_) => "definition-monikers",
            Cursor::SameRepo(_) => "same-repo",
            Cursor::RemoteRepo(_) => "remote-repo",
            Cursor::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Cursor::Done)
    }

    pub fn encode(&self) -> String {
        let envelope = EnvelopeRef {
            v: CURSOR_VERSION,
            cursor: self,
        };
        // Plain data with string keys; serialization cannot fail.
        let json = serde_json::to_vec(&envelope).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|err| Error::InvalidCursor(format!("bad encoding: {err}")))?;
        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|err| Error::InvalidCursor(format!("bad envelope: {err}")))?;
        if envelope.v != CURSOR_VERSION {
            return Err(Error::InvalidCursor(format!(
                "unsupported version {}",
                envelope.v
            )));
        }
        serde_json::from_value(envelope.cursor)
            .map_err(|err| Error::InvalidCursor(format!("bad cursor: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MonikerKind;

    fn moniker(kind: MonikerKind, identifier: &str, package: Option<&str>) -> MonikerData {
        MonikerData {
            kind,
            scheme: "gomod".to_string(),
            identifier: identifier.to_string(),
            package_information_id: package.map(str::to_string),
        }
    }

    fn samples() -> Vec<Cursor> {
        let position = PositionCursor {
            dump_id: 42,
            path: "main.go".to_string(),
            line: 23,
            character: 34,
            monikers: vec![
                moniker(MonikerKind::Import, "pad", Some("51")),
                moniker(MonikerKind::Local, "pad", None),
            ],
            skip_results: 5,
        };
        let package = PackageCursor {
            dump_id: 42,
            scheme: "gomod".to_string(),
            identifier: "pad".to_string(),
            name: "leftpad".to_string(),
            version: "0.1.0".to_string(),
            dump_ids: vec![50, 51, 52],
            total_dumps_when_batching: 10,
            skip_dumps_when_batching: 3,
            skip_dumps_in_batch: 1,
            skip_results_in_dump: 20,
        };
        vec![
            Cursor::SameDump(position.clone()),
            Cursor::SameDumpMonikers(position.clone()),
            Cursor::DefinitionMonikers(MonikerCursor {
                dump_id: 42,
                path: "main.go".to_string(),
                monikers: position.monikers.clone(),
                skip_results: 0,
            }),
            Cursor::SameRepo(package.clone()),
            Cursor::RemoteRepo(package),
            Cursor::Done,
        ]
    }

    #[test]
    fn every_phase_survives_the_wire() {
        for cursor in samples() {
            let token = cursor.encode();
            assert!(!token.contains('='));
            assert_eq!(Cursor::decode(&token).unwrap(), cursor);
        }
    }

    #[test]
    fn rejects_malformed_tokens() {
        let cases = [
            "not base64!".to_string(),
            URL_SAFE_NO_PAD.encode("{not json"),
            URL_SAFE_NO_PAD.encode(r#"{"v":2,"cursor":{"phase":"done"}}"#),
            URL_SAFE_NO_PAD.encode(r#"{"v":1,"cursor":{"phase":"sideways"}}"#),
            URL_SAFE_NO_PAD.encode(r#"{"v":1,"cursor":{"phase":"same-repo","dump_id":1}}"#),
            URL_SAFE_NO_PAD.encode(r#"{"cursor":{"phase":"done"}}"#),
        ];
        for raw in cases {
            let err = Cursor::decode(&raw).unwrap_err();
            assert!(matches!(err, Error::InvalidCursor(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn ignores_unknown_fields() {
        let raw = URL_SAFE_NO_PAD.encode(
            r#"{"v":1,"extra":true,"cursor":{"phase":"same-dump","dump_id":7,"path":"a.go","line":1,"character":2,"shiny":"new"}}"#,
        );
        let cursor = Cursor::decode(&raw).unwrap();
        assert_eq!(
            cursor,
            Cursor::SameDump(PositionCursor {
                dump_id: 7,
                path: "a.go".to_string(),
                line: 1,
                character: 2,
                monikers: Vec::new(),
                skip_results: 0,
            })
        );
    }

    #[test]
    fn restart_keeps_identity_only() {
        let Cursor::SameRepo(package) = &samples()[3] else {
            unreachable!()
        };
        let fresh = package.restart();
        assert_eq!(fresh.identifier, "pad");
        assert_eq!(fresh.name, "leftpad");
        assert!(fresh.dump_ids.is_empty());
        assert_eq!(fresh.skip_dumps_when_batching, 0);
        assert_eq!(fresh.skip_results_in_dump, 0);
    }
}
