//! Clade assignment output and its merge with NCBI sequence metadata.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::CladeTimeError;

pub const SEQUENCE_NAME_COLUMN: &str = "seqName";
pub const SEQUENCE_ID_COLUMN: &str = "seq";
pub const ACCESSION_COLUMN: &str = "Accession";
pub const CLADE_COLUMN: &str = "clade_nextstrain";

/// An in-memory delimited table with string cells. Missing trailing cells
/// are padded with empty strings on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path, delimiter: u8) -> Result<Self, CladeTimeError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(|err| CladeTimeError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_reader(&mut reader, path)
    }

    fn from_reader<R: std::io::Read>(
        reader: &mut csv::Reader<R>,
        path: &Path,
    ) -> Result<Self, CladeTimeError> {
        let what = path.display().to_string();
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| CladeTimeError::parse(&what, err))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| CladeTimeError::parse(&what, err))?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    fn require_column(&self, name: &str) -> Result<usize, CladeTimeError> {
        self.column_index(name)
            .ok_or_else(|| CladeTimeError::DataIntegrity(format!("missing column {name}")))
    }

    pub fn column(&self, name: &str) -> Result<Vec<&str>, CladeTimeError> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Keeps `columns`, in that order.
    pub fn select(&self, columns: &[String]) -> Result<Self, CladeTimeError> {
        let indices = columns
            .iter()
            .map(|name| self.require_column(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            headers: columns.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&idx| row[idx].clone()).collect())
                .collect(),
        })
    }

    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), CladeTimeError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer
            .write_record(&self.headers)
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))
    }
}

/// Adds a `seq` column (second position) holding the sequence id, the
/// first whitespace-separated token of `seqName`. Fails if two rows share
/// a sequence id.
pub fn parse_sequence_assignments(mut assignments: Table) -> Result<Table, CladeTimeError> {
    let name_idx = assignments.require_column(SEQUENCE_NAME_COLUMN)?;
    let mut seen = HashSet::with_capacity(assignments.len());
    for row in &mut assignments.rows {
        let seq = row[name_idx]
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if !seen.insert(seq.clone()) {
            return Err(CladeTimeError::DataIntegrity(format!(
                "clade assignment data contains duplicate sequence {seq}"
            )));
        }
        row.insert(1.min(row.len()), seq);
    }
    assignments
        .headers
        .insert(1.min(assignments.headers.len()), SEQUENCE_ID_COLUMN.to_string());
    Ok(assignments)
}

/// Values stamped onto every merged row.
#[derive(Debug, Clone, Serialize)]
pub struct MergeContext {
    pub sequence_released_since: String,
    pub reference_tree_date: String,
    pub sequence_retrieved_datetime: String,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub table: Table,
    pub missing_assignments: usize,
}

/// Left-joins sequence metadata (one row per `Accession`) with parsed
/// assignments on `Accession = seq`. Assignment columns whose names collide
/// with metadata columns get a `_right` suffix. When `columns` is non-empty
/// only those columns are kept.
pub fn merge_metadata(
    metadata: &Table,
    assignments: &Table,
    context: &MergeContext,
    columns: &[String],
) -> Result<MergeOutcome, CladeTimeError> {
    let accession_idx = metadata.require_column(ACCESSION_COLUMN)?;
    let mut accessions = HashSet::with_capacity(metadata.len());
    for row in &metadata.rows {
        if !accessions.insert(row[accession_idx].as_str()) {
            return Err(CladeTimeError::DataIntegrity(format!(
                "sequence metadata contains duplicate Accession {}",
                row[accession_idx]
            )));
        }
    }

    let seq_idx = assignments.require_column(SEQUENCE_ID_COLUMN)?;
    let by_seq: HashMap<&str, &Vec<String>> = assignments
        .rows
        .iter()
        .map(|row| (row[seq_idx].as_str(), row))
        .collect();
    let carried: Vec<usize> = (0..assignments.headers.len())
        .filter(|&idx| idx != seq_idx)
        .collect();

    let mut headers = metadata.headers.clone();
    for &idx in &carried {
        let name = &assignments.headers[idx];
        if metadata.headers.contains(name) {
            headers.push(format!("{name}_right"));
        } else {
            headers.push(name.clone());
        }
    }
    headers.extend(
        [
            "sequence_released_since",
            "reference_tree_date",
            "sequence_retrieved_datetime",
        ]
        .map(str::to_string),
    );

    let rows = metadata
        .rows
        .iter()
        .map(|row| {
            let mut merged = row.clone();
            let matched = by_seq.get(row[accession_idx].as_str());
            for &idx in &carried {
                merged.push(matched.map(|m| m[idx].clone()).unwrap_or_default());
            }
            merged.push(context.sequence_released_since.clone());
            merged.push(context.reference_tree_date.clone());
            merged.push(context.sequence_retrieved_datetime.clone());
            merged
        })
        .collect();
    let joined = Table { headers, rows };

    let missing_assignments = match joined.column_index(CLADE_COLUMN) {
        Some(idx) => joined.rows.iter().filter(|row| row[idx].is_empty()).count(),
        None => joined.len(),
    };
    if missing_assignments == 0 {
        info!(
            num_sequences = joined.len(),
            "sequence metadata merged with clade assignments"
        );
    } else {
        warn!(
            num_sequences = joined.len(),
            missing_clade_assignments = missing_assignments,
            "some sequences are missing clade assignments"
        );
    }

    let table = if columns.is_empty() {
        joined
    } else {
        joined.select(columns)?
    };
    Ok(MergeOutcome {
        table,
        missing_assignments,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn assignments() -> Table {
        Table {
            headers: vec!["seqName".to_string(), "clade".to_string()],
            rows: vec![
                vec![
                    "PP782799.1 Severe acute respiratory syndrome coronavirus 2 isolate SARS-CoV-2/human/USA/NY-PV74597/2022".to_string(),
                    "BA.5.2.1".to_string(),
                ],
                vec!["ABCDEFG Severe caffeine deprivation virus".to_string(), "XX.99.88.77".to_string()],
                vec!["12345678 ".to_string(), "howdy".to_string()],
            ],
        }
    }

    #[test]
    fn parse_sequence_ids() {
        let parsed = parse_sequence_assignments(assignments()).unwrap();
        assert_eq!(parsed.headers, vec!["seqName", "seq", "clade"]);
        assert_eq!(
            parsed.column("seq").unwrap(),
            vec!["PP782799.1", "ABCDEFG", "12345678"]
        );
    }

    #[test]
    fn duplicate_sequences_are_rejected() {
        let mut doubled = assignments();
        doubled.rows.extend(assignments().rows);
        assert_matches!(
            parse_sequence_assignments(doubled),
            Err(CladeTimeError::DataIntegrity(_))
        );
    }

    #[test]
    fn select_reorders_and_checks() {
        let table = assignments();
        let selected = table.select(&["clade".to_string()]).unwrap();
        assert_eq!(selected.headers, vec!["clade"]);
        assert_eq!(selected.rows[2], vec!["howdy"]);
        assert_matches!(
            table.select(&["nope".to_string()]),
            Err(CladeTimeError::DataIntegrity(_))
        );
    }
}
