//! Assembles bundle contents in the stored layout.

use super::hash_key;
use crate::model::{
    DiagnosticData, DocumentData, DocumentIdRangeId, Id, Location, MetaData, MonikerData,
    MonikerTable, PackageInformationData, RangeData, ResultChunkData,
};
use std::collections::{BTreeMap, HashMap};

/// One row of a bundle's definitions or references moniker table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonikerRow {
    pub scheme: String,
    pub identifier: String,
    pub location: Location,
}

/// A complete bundle: documents, sharded result chunks and moniker tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleData {
    pub meta: Option<MetaData>,
    pub documents: BTreeMap<String, DocumentData>,
    pub result_chunks: HashMap<usize, ResultChunkData>,
    pub definitions: Vec<MonikerRow>,
    pub references: Vec<MonikerRow>,
}

impl BundleData {
    pub fn moniker_rows(&self, table: MonikerTable) -> &[MonikerRow] {
        match table {
            MonikerTable::Definitions => &self.definitions,
            MonikerTable::References => &self.references,
        }
    }
}

/// Builds [`BundleData`], sharding results into chunks with [`hash_key`].
pub struct BundleBuilder {
    num_result_chunks: usize,
    data: BundleData,
    document_ids: HashMap<String, Id>,
}

impl BundleBuilder {
    pub fn new(num_result_chunks: usize) -> Self {
        let data = BundleData {
            meta: Some(MetaData { num_result_chunks }),
            ..BundleData::default()
        };
        Self {
            num_result_chunks,
            data,
            document_ids: HashMap::new(),
        }
    }

    /// Registers a document even if it has no ranges.
    pub fn document(&mut self, path: &str) -> &mut Self {
        self.doc(path);
        self
    }

    pub fn range(&mut self, path: &str, id: &str, range: RangeData) -> &mut Self {
        self.doc(path).ranges.insert(id.to_string(), range);
        self
    }

    pub fn hover(&mut self, path: &str, id: &str, text: &str) -> &mut Self {
        self.doc(path).hover_results.insert(id.to_string(), text.to_string());
        self
    }

    pub fn moniker(&mut self, path: &str, id: &str, moniker: MonikerData) -> &mut Self {
        self.doc(path).monikers.insert(id.to_string(), moniker);
        self
    }

    pub fn package_information(&mut self, path: &str, id: &str, package: PackageInformationData) -> &mut Self {
        self.doc(path).package_information.insert(id.to_string(), package);
        self
    }

    pub fn diagnostic(&mut self, path: &str, diagnostic: DiagnosticData) -> &mut Self {
        self.doc(path).diagnostics.push(diagnostic);
        self
    }

    /// Records a definition or reference result pointing at `(path, range id)` pairs.
    pub fn result(&mut self, result_id: &str, targets: &[(&str, &str)]) -> &mut Self {
        let index = hash_key(result_id, self.num_result_chunks);
        let mut pairs = Vec::with_capacity(targets.len());
        for (path, range_id) in targets {
            let document_id = self.document_id(path);
            let chunk = self.data.result_chunks.entry(index).or_default();
            chunk.document_paths.insert(document_id.clone(), path.to_string());
            pairs.push(DocumentIdRangeId {
                document_id,
                range_id: range_id.to_string(),
            });
        }
        self.data
            .result_chunks
            .entry(index)
            .or_default()
            .document_id_range_ids
            .insert(result_id.to_string(), pairs);
        self
    }

    pub fn moniker_row(&mut self, table: MonikerTable, scheme: &str, identifier: &str, location: Location) -> &mut Self {
        let row = MonikerRow {
            scheme: scheme.to_string(),
            identifier: identifier.to_string(),
            location,
        };
        match table {
            MonikerTable::Definitions => self.data.definitions.push(row),
            MonikerTable::References => self.data.references.push(row),
        }
        self
    }

    pub fn build(&self) -> BundleData {
        self.data.clone()
    }

    fn doc(&mut self, path: &str) -> &mut DocumentData {
        self.data.documents.entry(path.to_string()).or_default()
    }

    fn document_id(&mut self, path: &str) -> Id {
        let next = self.document_ids.len() + 1;
        self.document_ids
            .entry(path.to_string())
            .or_insert_with(|| next.to_string())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_land_in_their_hashed_chunk() {
        let mut builder = BundleBuilder::new(4);
        builder
            .range("a.go", "r1", RangeData::new(0, 0, 0, 3))
            .range("b.go", "r2", RangeData::new(1, 0, 1, 3))
            .result("def1", &[("a.go", "r1"), ("b.go", "r2")]);
        let data = builder.build();

        let chunk = &data.result_chunks[&hash_key("def1", 4)];
        let pairs = &chunk.document_id_range_ids["def1"];
        assert_eq!(pairs.len(), 2);
        assert_eq!(chunk.document_paths[&pairs[0].document_id], "a.go");
        assert_eq!(chunk.document_paths[&pairs[1].document_id], "b.go");
        assert_eq!(data.meta, Some(MetaData { num_result_chunks: 4 }));
    }
}
