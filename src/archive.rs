//! Archive Packing - Zip <-> Working Directory

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

use crate::engine::{relative_path, EngineError};

/// Extracts every entry of `archive` under `destination`, creating it if needed.
///
/// Entries escaping the destination (`../`, absolute names) are skipped.
pub fn unzip(archive: &Path, destination: &Path) -> Result<(), EngineError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;

    fs::create_dir_all(destination)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = %entry.name(), "Skipping archive entry outside of the destination");
            continue;
        };
        let target = destination.join(relative);
        debug!(file = %target.display(), "Extracting file");

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = BufWriter::new(File::create(&target)?);
        io::copy(&mut entry, &mut output)?;
        output.flush()?;
    }

    debug!(archive = %archive.display(), "Extraction done");
    Ok(())
}

/// Zips the whole tree under `source` into `destination`, overwriting it.
///
/// Entry names are relative to `source` and `/`-separated. `destination`
/// itself is never added, even when it lives inside `source`.
pub fn zip_directory(source: &Path, destination: &Path) -> Result<(), EngineError> {
    if !source.is_dir() {
        return Err(EngineError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", source.display()),
        )));
    }

    let mut entries = vec![];
    collect_entries(source, &mut entries)?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = ZipWriter::new(BufWriter::new(File::create(destination)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        if entry == destination {
            continue;
        }
        let name = relative_path(source, &entry);
        debug!(entry = %name, "Compressing file");

        if entry.is_dir() {
            writer.add_directory(format!("{}/", name), options)?;
        } else {
            writer.start_file(name, options)?;
            let mut input = BufReader::new(File::open(&entry)?);
            io::copy(&mut input, &mut writer)?;
        }
    }

    let mut inner = writer.finish()?;
    inner.flush()?;

    debug!(archive = %destination.display(), "File compressed");
    Ok(())
}

fn collect_entries(directory: &Path, out: &mut Vec<PathBuf>) -> Result<(), EngineError> {
    let mut children: Vec<PathBuf> = fs::read_dir(directory)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    children.sort();

    for child in children {
        let is_dir = child.is_dir();
        out.push(child.clone());
        if is_dir {
            collect_entries(&child, out)?;
        }
    }
    Ok(())
}
