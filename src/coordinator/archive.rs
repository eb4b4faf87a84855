//! World archiving. Tasks only see the [`Archiver`] trait; [`ZipArchiver`]
//! is the default implementation.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::supervisor::error::SupervisorError;

pub trait Archiver: Send + Sync + 'static {
    /// Pack the contents of `src_dir` into the archive file `dest`.
    fn archive(&self, src_dir: &Path, dest: &Path) -> Result<(), SupervisorError>;
    /// Unpack `archive` into the existing directory `dest_dir`.
    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<(), SupervisorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn archive(&self, src_dir: &Path, dest: &Path) -> Result<(), SupervisorError> {
        let file = fs::File::create(dest)?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        add_dir(&mut zip, src_dir, "", options).map_err(archive_failure)?;
        zip.finish().map_err(archive_failure)?;
        Ok(())
    }

    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<(), SupervisorError> {
        let file = fs::File::open(archive)?;
        let mut zip = ZipArchive::new(file).map_err(archive_failure)?;
        zip.extract(dest_dir).map_err(archive_failure)?;
        Ok(())
    }
}

fn add_dir(
    zip: &mut ZipWriter<fs::File>,
    dir: &Path,
    prefix: &str,
    options: FileOptions,
) -> zip::result::ZipResult<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
            add_dir(zip, &path, &format!("{}/", name), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut f = fs::File::open(&path)?;
            io::copy(&mut f, zip)?;
        }
    }
    Ok(())
}

fn archive_failure(e: impl std::fmt::Display) -> SupervisorError {
    SupervisorError::ArchiveToolFailure(e.to_string())
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
