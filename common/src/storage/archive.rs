use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use flate2::{bufread::GzDecoder, write::GzEncoder, Compression};
use tar::Archive;
use tracing::debug;

use crate::error::AppError;

/// Compresses every regular file under `source_dir` into a single tar.gz
/// archive at `archive_path`. Entry names are the file paths relative to
/// `source_dir`.
pub async fn pack_dir(source_dir: &Path, archive_path: &Path) -> Result<(), AppError> {
    let source = source_dir.to_path_buf();
    let archive = archive_path.to_path_buf();

    tokio::task::spawn_blocking(move || pack_dir_sync(&source, &archive)).await?
}

/// Extracts an archive produced by [`pack_dir`] under `dest_dir`, recreating
/// relative paths and creating `dest_dir` when absent.
pub async fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> Result<(), AppError> {
    let archive = archive_path.to_path_buf();
    let dest = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || unpack_archive_sync(&archive, &dest)).await?
}

fn pack_dir_sync(source_dir: &Path, archive_path: &Path) -> Result<(), AppError> {
    if !source_dir.is_dir() {
        return Err(AppError::Io(io::Error::new(
            ErrorKind::NotFound,
            format!("archive source is not a directory: {}", source_dir.display()),
        )));
    }

    let file = fs::File::create(archive_path)?;
    let encoder = GzEncoder::new(io::BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder.append_dir_all("", source_dir)?;

    // Finish the tar stream, then the gzip stream, then flush the writer.
    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;

    debug!(
        source = %source_dir.display(),
        archive = %archive_path.display(),
        "Packed index directory into archive"
    );

    Ok(())
}

fn unpack_archive_sync(archive_path: &Path, dest_dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dest_dir)?;

    let file = fs::File::open(archive_path)?;
    let mut archive = Archive::new(GzDecoder::new(io::BufReader::new(file)));
    archive.unpack(dest_dir)?;

    debug!(
        archive = %archive_path.display(),
        dest = %dest_dir.display(),
        "Unpacked archive"
    );

    Ok(())
}

/// Lists the relative paths of every regular file under `dir`, sorted, so
/// callers can compare trees.
pub fn collect_relative_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    fn walk(base: &Path, current: &Path, out: &mut Vec<PathBuf>) -> Result<(), AppError> {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                walk(base, &path, out)?;
            } else if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}
