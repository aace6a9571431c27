//! Zip helpers shared by game installs and save archives.

use std::fs::File;
use std::path::{Component, Path};

use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extract `archive` into `dest`, creating it. Entries that would land
/// outside `dest` are rejected by the zip reader.
pub(crate) fn extract(archive: &Path, dest: &Path) -> ZipResult<()> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    std::fs::create_dir_all(dest)?;
    zip.extract(dest)
}

/// Write a deflated archive at `out` holding `files`, each stored under its
/// path relative to `root`. Returns the number of entries written.
pub(crate) fn pack<'a>(
    root: &Path,
    files: impl IntoIterator<Item = &'a Path>,
    out: &Path,
) -> ZipResult<usize> {
    let mut zip = ZipWriter::new(File::create(out)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut written = 0;
    for file in files {
        let Some(name) = entry_name(root, file) else {
            continue;
        };
        zip.start_file(name, options)?;
        std::io::copy(&mut File::open(file)?, &mut zip)?;
        written += 1;
    }
    zip.finish()?;
    Ok(written)
}

/// `/`-separated archive name of `file` under `root`.
fn entry_name(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
