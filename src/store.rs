use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::error::CladeTimeError;

/// File layout of one pipeline run's data directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    /// Uses `data_dir` when given, otherwise `~/covid_variant/<run_time>`.
    pub fn new(data_dir: Option<&str>, run_time: &str) -> Result<Self, CladeTimeError> {
        let root = match data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => BaseDirs::new()
                .and_then(|dirs| {
                    Utf8PathBuf::from_path_buf(dirs.home_dir().join("covid_variant").join(run_time))
                        .ok()
                })
                .ok_or_else(|| {
                    CladeTimeError::Filesystem("unable to resolve home directory".to_string())
                })?,
        };
        Ok(Self { root })
    }

    pub fn new_with_path(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), CladeTimeError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))
    }

    pub fn ncbi_package_path(&self, package_name: &str) -> Utf8PathBuf {
        self.root.join(package_name)
    }

    pub fn ncbi_sequence_file(&self) -> Utf8PathBuf {
        self.root.join("ncbi_dataset/data/genomic.fna")
    }

    pub fn ncbi_data_report(&self) -> Utf8PathBuf {
        self.root.join("ncbi_dataset/data/data_report.jsonl")
    }

    pub fn sequence_metadata_file(&self, released_since: &str) -> Utf8PathBuf {
        self.root.join(format!("{released_since}-metadata.tsv"))
    }

    pub fn nextclade_dataset_path(&self, tag: &str) -> Utf8PathBuf {
        self.root.join(format!("nextclade_dataset_{tag}.zip"))
    }

    pub fn assignment_no_metadata_file(&self, released_since: &str) -> Utf8PathBuf {
        self.root
            .join(format!("{released_since}_clade_assignments_no_metadata.csv"))
    }

    pub fn assignment_file(&self, released_since: &str) -> Utf8PathBuf {
        self.root
            .join(format!("{released_since}_clade_assignments.csv"))
    }

    /// Writes `path` through a temp file in the same directory so readers
    /// never observe a partial file.
    pub fn write_atomic<F>(path: &Utf8Path, write: F) -> Result<(), CladeTimeError>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), CladeTimeError>,
    {
        let parent = path
            .parent()
            .ok_or_else(|| CladeTimeError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".cladetime")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            write(&mut writer)?;
            writer
                .flush()
                .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
