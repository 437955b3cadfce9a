use std::fs;
use std::io;
use std::path::Path;

use tracing::error;
use zip::ZipArchive;

use crate::error::CladeTimeError;

fn open_archive(zip_path: &Path) -> Result<ZipArchive<fs::File>, CladeTimeError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        CladeTimeError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    ZipArchive::new(file).map_err(|err| CladeTimeError::Filesystem(err.to_string()))
}

pub fn zip_entry_names(zip_path: &Path) -> Result<Vec<String>, CladeTimeError> {
    let archive = open_archive(zip_path)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), CladeTimeError> {
    let mut archive = open_archive(zip_path)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(CladeTimeError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| CladeTimeError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Extracts an NCBI virus genome package after checking it carries both a
/// data report and the genomic sequences.
pub fn unzip_sequence_package(zip_path: &Path, target_dir: &Path) -> Result<(), CladeTimeError> {
    let contents = zip_entry_names(zip_path)?;
    let has_report = contents.iter().any(|name| name.contains("data_report"));
    let has_sequences = contents.iter().any(|name| name.contains("genomic"));
    if !(has_report && has_sequences) {
        error!(zip_contents = ?contents, "NCBI package is missing expected files");
        return Err(CladeTimeError::DataIntegrity(
            "NCBI package is missing data_report or genomic sequences".to_string(),
        ));
    }
    extract_zip(zip_path, target_dir)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn unzip_complete_package() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("ncbi.zip");
        write_zip(
            &zip_path,
            &[
                ("ncbi_dataset/data/data_report.jsonl", "{}\n"),
                ("ncbi_dataset/data/genomic.fna", ">PP782799.1\nACGT\n"),
            ],
        );
        unzip_sequence_package(&zip_path, temp.path()).unwrap();
        assert!(temp.path().join("ncbi_dataset/data/genomic.fna").exists());
    }

    #[test]
    fn reject_incomplete_package() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("ncbi.zip");
        write_zip(&zip_path, &[("ncbi_dataset/data/data_report.jsonl", "{}\n")]);
        let err = unzip_sequence_package(&zip_path, temp.path()).unwrap_err();
        assert!(matches!(err, CladeTimeError::DataIntegrity(_)));
    }
}
