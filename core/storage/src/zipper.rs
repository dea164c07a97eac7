//! ZIP packaging of stored files.
//!
//! Archives are standard Deflate-compressed ZIP containers. Extraction is
//! idempotent: an entry whose output path already exists is considered
//! materialized and left untouched, so a partially extracted destination
//! converges when extraction is simply run again.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use omnistore_common::{Error, Result};

use crate::spool::SPOOL_PREFIX;

fn archive_fault(action: &str, err: ZipError) -> Error {
    Error::Archive(format!("Unable to {}: {}", action, err))
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn write_entry<W: Write + Seek, R: Read>(
    writer: &mut ZipWriter<W>,
    name: String,
    source: &mut R,
) -> Result<()> {
    writer
        .start_file(name.clone(), entry_options())
        .map_err(|e| archive_fault(&format!("add entry {}", name), e))?;
    io::copy(source, writer)?;
    Ok(())
}

/// Compress on-disk files into a ZIP archive at `dst`.
///
/// Each file becomes one entry named after its base name. Paths that do
/// not exist or are not regular files are skipped.
///
/// # Postconditions
/// - `dst` holds a complete archive; it is returned for chaining
///
/// # Errors
/// - `Archive` if two files share a base name
/// - I/O failure reading a source or writing `dst`
pub fn compress_files<P: AsRef<Path>>(files: &[P], dst: &Path) -> Result<PathBuf> {
    let mut writer = ZipWriter::new(File::create(dst)?);
    let mut added = 0usize;

    for path in files.iter().map(AsRef::as_ref) {
        let is_file = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());

        match (is_file, name) {
            (true, Some(name)) => {
                let mut source = File::open(path)?;
                write_entry(&mut writer, name, &mut source)?;
                added += 1;
            }
            _ => debug!(path = %path.display(), "Skipping missing or non-regular file"),
        }
    }

    writer
        .finish()
        .map_err(|e| archive_fault(&format!("finish {}", dst.display()), e))?;

    info!(archive = %dst.display(), entries = added, "Archive written");
    Ok(dst.to_path_buf())
}

/// Compress named in-memory sources into ZIP bytes.
///
/// # Errors
/// - `Archive` on duplicate entry names
/// - I/O failure reading a source
pub fn compress_streams<I, N, R>(entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (N, R)>,
    N: Into<String>,
    R: Read,
{
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for (name, mut source) in entries {
        write_entry(&mut writer, name.into(), &mut source)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| archive_fault("finish in-memory archive", e))?;
    Ok(cursor.into_inner())
}

/// Write one entry beside `output`, then move it into place.
///
/// Returns `false` when another writer installed `output` first.
fn materialize<R: Read>(entry: &mut R, output: &Path, dst: &Path) -> io::Result<bool> {
    let parent = output.parent().unwrap_or(dst);
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(SPOOL_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent)?;
    io::copy(entry, &mut temp)?;
    temp.as_file().sync_all()?;

    match temp.persist_noclobber(output) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Extract the archive at `archive` into `dst`.
///
/// See [`decompress_reader`].
pub fn decompress(dst: &Path, archive: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            Error::NotFound(format!("Archive {} not found", archive.display()))
        }
        _ => Error::Io(e),
    })?;
    decompress_reader(dst, file)
}

/// Extract every file entry of a ZIP archive into `dst`.
///
/// Parent directories are created as needed and directory entries are
/// skipped. Each entry is written to a temporary sibling and moved into
/// place without replacing anything, so an existing output is never
/// overwritten.
///
/// # Postconditions
/// - Every file entry exists under `dst`
/// - Returns the output path of every file entry, extracted now or earlier
///
/// # Errors
/// - `Archive` if the container is malformed or an entry name would
///   escape `dst`
/// - `Archive` if an entry is corrupt or cannot be written out
pub fn decompress_reader<R: Read + Seek>(dst: &Path, reader: R) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(reader).map_err(|e| archive_fault("open archive", e))?;
    let mut outputs = Vec::with_capacity(archive.len());
    let mut extracted = 0usize;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| archive_fault(&format!("read entry {}", index), e))?;

        if entry.is_dir() {
            continue;
        }

        let relative = entry.enclosed_name().ok_or_else(|| {
            Error::Archive(format!("Entry {} escapes the destination", entry.name()))
        })?;
        let output = dst.join(relative);

        if fs::symlink_metadata(&output).is_ok() {
            debug!(path = %output.display(), "Already extracted");
            outputs.push(output);
            continue;
        }

        let name = entry.name().to_string();
        let installed = materialize(&mut entry, &output, dst).map_err(|e| {
            Error::Archive(format!(
                "Unable to extract {} to {}: {}",
                name,
                output.display(),
                e
            ))
        })?;
        if installed {
            extracted += 1;
        } else {
            warn!(path = %output.display(), "Extracted concurrently, keeping existing file");
        }

        outputs.push(output);
    }

    info!(destination = %dst.display(), extracted, total = outputs.len(), "Archive extracted");
    Ok(outputs)
}
