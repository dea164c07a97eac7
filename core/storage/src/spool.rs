//! Scoped temporary files for buffering streams before upload.

use std::path::Path;
use tempfile::{Builder, NamedTempFile};
use tokio::io::AsyncWriteExt;

use omnistore_common::Result;

use crate::provider::ObjectReader;

/// Name prefix of spool files, so listings can hide in-flight writes.
pub(crate) const SPOOL_PREFIX: &str = ".omnistore-";

/// Drain `reader` into a temporary file.
///
/// The file is created in `dir` (or the system temp directory) and deleted
/// when the returned handle drops, whichever way the caller exits.
pub(crate) async fn spool(mut reader: ObjectReader, dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix(SPOOL_PREFIX).suffix(".tmp");
    let temp = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    let mut file = tokio::fs::File::from_std(temp.reopen()?);
    tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;

    Ok(temp)
}
