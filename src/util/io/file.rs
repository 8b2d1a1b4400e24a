use std::io;
use std::path::Path;
use walkdir::WalkDir;

const BYTES_PER_MB: u64 = 1024 * 1024;

/**
  * Apparent size of all regular files below a path in bytes.
  * Symbolic links are not followed. Fails on the first entry that can not be read.
  */
pub fn size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Size rounded up to whole megabytes (MiB)
pub fn size_mb(path: &Path) -> io::Result<u64> {
    let bytes = size(path)?;
    Ok((bytes + BYTES_PER_MB - 1) / BYTES_PER_MB)
}
