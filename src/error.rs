use std::fmt;
use thiserror::Error;

/// The internal cross-reference a malformed bundle failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingKind {
    Metadata,
    ResultChunk,
    Result,
    DocumentPath,
    Document,
    Range,
    HoverResult,
    Moniker,
}

impl fmt::Display for MissingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissingKind::Metadata => "metadata",
            MissingKind::ResultChunk => "result chunk",
            MissingKind::Result => "result",
            MissingKind::DocumentPath => "document path",
            MissingKind::Document => "document",
            MissingKind::Range => "range",
            MissingKind::HoverResult => "hover result",
            MissingKind::Moniker => "moniker",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("dump {0} not found")]
    MissingDump(i64),

    #[error("bundle for dump {0} is unavailable")]
    BundleUnavailable(i64),

    #[error("malformed bundle for dump {dump_id}: missing {kind} {key:?}")]
    MalformedBundle {
        dump_id: i64,
        kind: MissingKind,
        key: String,
    },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("{op}: {source:#}")]
    Upstream {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn malformed(dump_id: i64, kind: MissingKind, key: impl Into<String>) -> Self {
        Error::MalformedBundle {
            dump_id,
            kind,
            key: key.into(),
        }
    }

    /// Short machine-readable tag, used by the RPC layer and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingDump(_) => "missing_dump",
            Error::BundleUnavailable(_) => "bundle_unavailable",
            Error::MalformedBundle { .. } => "malformed_bundle",
            Error::InvalidCursor(_) => "invalid_cursor",
            Error::Cancelled => "cancelled",
            Error::Upstream { .. } => "upstream",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wraps collaborator failures with the name of the operation that issued them.
pub trait UpstreamExt<T> {
    fn upstream(self, op: &'static str) -> Result<T>;
}

impl<T> UpstreamExt<T> for anyhow::Result<T> {
    fn upstream(self, op: &'static str) -> Result<T> {
        // Adapters may fail with a query error of their own (cancellation,
        // an unavailable or malformed bundle); keep it as is.
        self.map_err(|source| match source.downcast::<Error>() {
            Ok(err) => err,
            Err(source) => Error::Upstream { op, source },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_bundle_names_missing_key() {
        let err = Error::malformed(42, MissingKind::ResultChunk, "7");
        assert_eq!(
            err.to_string(),
            "malformed bundle for dump 42: missing result chunk \"7\""
        );
        assert_eq!(err.code(), "malformed_bundle");
    }

    #[test]
    fn upstream_keeps_source_chain() {
        let res: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = res.upstream("store.get_dump_by_id").unwrap_err();
        assert_eq!(err.to_string(), "store.get_dump_by_id: connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn upstream_passes_cancellation_through() {
        let res: anyhow::Result<()> = Err(Error::Cancelled.into());
        let err = res.upstream("reader.read_document").unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn upstream_passes_bundle_errors_through() {
        let res: anyhow::Result<()> = Err(Error::BundleUnavailable(3).into());
        let err = res.upstream("reader.read_document").unwrap_err();
        assert!(matches!(err, Error::BundleUnavailable(3)));

        let res: anyhow::Result<()> =
            Err(Error::malformed(3, MissingKind::Metadata, "meta").into());
        let err = res.upstream("reader.read_meta").unwrap_err();
        assert_eq!(err.code(), "malformed_bundle");
    }
}
