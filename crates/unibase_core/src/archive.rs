//! Export archives.
//!
//! A backend dumps into a plain directory; the directory is then packed as a
//! zstd-compressed tarball named `<prefix>_<timestamp_ms>.tar.zst`. Import
//! reverses the process into a temporary directory.

use crate::error::Result;
use crate::record::timestamp_ms;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::debug;

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// Directory name used inside the tarball.
const DUMP_ROOT: &str = "dump";

const COMPRESSION_LEVEL: i32 = 3;

/// Builds `<dir>/<prefix>_<timestamp_ms>.tar.zst`.
pub fn archive_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}_{}.{ARCHIVE_EXTENSION}", timestamp_ms()))
}

/// Packs the contents of `src` into the archive at `dest`.
pub fn pack(src: &Path, dest: &Path) -> Result<()> {
    let file = BufWriter::new(File::create(dest)?);
    let encoder = zstd::Encoder::new(file, COMPRESSION_LEVEL)?;

    let mut builder = Builder::new(encoder);
    builder.append_dir_all(DUMP_ROOT, src)?;
    let encoder = builder.into_inner()?;
    let mut file = encoder.finish()?;
    file.flush()?;

    debug!(src = %src.display(), dest = %dest.display(), "archive packed");
    Ok(())
}

/// Unpacks `archive` below `dest` and returns the dump directory.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let decoder = zstd::Decoder::new(BufReader::new(File::open(archive)?))?;
    Archive::new(decoder).unpack(dest)?;

    let root = dest.join(DUMP_ROOT);
    if !root.is_dir() {
        fs::create_dir_all(&root)?;
    }
    debug!(archive = %archive.display(), dest = %root.display(), "archive unpacked");
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_preserves_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.json"), b"[1,2,3]").unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested").join("b.bin"), b"\x00\x01").unwrap();

        let out = tempfile::tempdir().unwrap();
        let path = archive_path(out.path(), "uni");
        pack(src.path(), &path).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("uni_"));
        assert!(name.ends_with(".tar.zst"));

        let dest = tempfile::tempdir().unwrap();
        let root = unpack(&path, dest.path()).unwrap();
        assert_eq!(fs::read(root.join("a.json")).unwrap(), b"[1,2,3]");
        assert_eq!(fs::read(root.join("nested").join("b.bin")).unwrap(), b"\x00\x01");
    }

    #[test]
    fn unpack_missing_archive_fails() {
        let dest = tempfile::tempdir().unwrap();
        assert!(unpack(&dest.path().join("nope.tar.zst"), dest.path()).is_err());
    }
}
