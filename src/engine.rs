//! Engine Contract - Archive-Backed Configuration
//!
//! An engine owns one open document: the archive on disk, the working
//! directory it was unpacked into and the configuration parsed from that
//! directory. Template and presentation engines implement [`Engine`]; the
//! shared bookkeeping lives in [`EngineCore`].

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::debug;

use crate::archive;

/// Prefix of every generated working directory.
pub const WORKING_DIRECTORY_PREFIX: &str = "sfx-";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Malformed configuration: {0}")]
    MalformedConfiguration(String),

    #[error("Precondition violated: {0}")]
    Precondition(&'static str),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Epoch milliseconds, strictly increasing across calls within the process.
///
/// Used wherever the engine needs a timestamp that doubles as a unique key:
/// working directory suffixes and generated slide numbers.
pub fn unique_timestamp() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_TIMESTAMP.load(Ordering::SeqCst);
    loop {
        let candidate = if now > last { now } else { last + 1 };
        match LAST_TIMESTAMP.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Relative, `/`-separated path from `base` to `target`.
///
/// A relative `target` is taken as already relative to `base`.
pub fn relative_path(base: &Path, target: &Path) -> String {
    if target.is_relative() {
        return target
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
    }

    let base: Vec<_> = base.components().collect();
    let target: Vec<_> = target.components().collect();
    let common = base.iter().zip(&target).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = vec![];
    for _ in common..base.len() {
        parts.push("..".to_string());
    }
    for component in &target[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

/// State shared by every engine implementation.
#[derive(Debug)]
pub struct EngineCore {
    archive_extension: &'static str,
    configuration_filename: &'static str,
    archive_file: Option<PathBuf>,
    working_directory: Option<PathBuf>,
    temp_root: PathBuf,
    save_lock: Mutex<()>,
}

impl EngineCore {
    pub fn new(archive_extension: &'static str, configuration_filename: &'static str) -> Self {
        Self {
            archive_extension,
            configuration_filename,
            archive_file: None,
            working_directory: None,
            temp_root: std::env::temp_dir(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn archive_extension(&self) -> &'static str {
        self.archive_extension
    }

    pub fn configuration_filename(&self) -> &'static str {
        self.configuration_filename
    }

    pub fn archive(&self) -> Option<&Path> {
        self.archive_file.as_deref()
    }

    pub fn set_archive(&mut self, file: Option<PathBuf>) {
        self.archive_file = file;
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    pub fn set_working_directory(&mut self, directory: Option<PathBuf>) {
        self.working_directory = directory;
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn set_temp_root(&mut self, root: PathBuf) {
        self.temp_root = root;
    }

    pub fn require_working_directory(&self) -> Result<&Path, EngineError> {
        self.working_directory
            .as_deref()
            .ok_or(EngineError::Precondition("The working directory is not set"))
    }

    pub fn configuration_path(&self) -> Result<PathBuf, EngineError> {
        let directory = self.require_working_directory()?;
        if self.configuration_filename.is_empty() {
            return Err(EngineError::Precondition("The configuration filename can not be empty"));
        }
        Ok(directory.join(self.configuration_filename))
    }

    /// `<temp-root>/sfx-<epoch-millis>`. Only builds the path.
    pub fn generate_working_directory(&self) -> PathBuf {
        self.temp_root
            .join(format!("{}{}", WORKING_DIRECTORY_PREFIX, unique_timestamp()))
    }

    pub fn relativize(&self, file: &Path) -> Result<String, EngineError> {
        let directory = self.require_working_directory()?;
        Ok(relative_path(directory, file))
    }

    pub fn has_valid_extension(&self, file: &Path) -> bool {
        let dotted = format!(".{}", self.archive_extension);
        file.file_name()
            .map(|name| name.to_string_lossy().ends_with(&dotted))
            .unwrap_or(false)
    }

    pub fn check_extension(&self, file: &Path) -> Result<(), EngineError> {
        if self.has_valid_extension(file) {
            Ok(())
        } else {
            Err(EngineError::InvalidArchive(format!(
                "{} does not have the .{} extension",
                file.display(),
                self.archive_extension
            )))
        }
    }

    /// Extension first, then existence and readability.
    pub fn check_archive_to_load(&self, file: &Path) -> Result<(), EngineError> {
        self.check_extension(file)?;

        if !file.is_file() {
            return Err(EngineError::InvalidArchive(format!(
                "{} does not exist",
                file.display()
            )));
        }
        File::open(file).map_err(|e| {
            EngineError::InvalidArchive(format!("{} can not be read: {}", file.display(), e))
        })?;
        Ok(())
    }

    /// Validates `file`, assigns it as the archive and unpacks it into a
    /// freshly generated working directory. Nothing is rolled back on failure.
    pub fn unpack(&mut self, file: &Path) -> Result<PathBuf, EngineError> {
        self.check_archive_to_load(file)?;

        let working_directory = self.generate_working_directory();
        self.archive_file = Some(file.to_path_buf());
        self.working_directory = Some(working_directory.clone());

        debug!(archive = %file.display(), working_directory = %working_directory.display(), "Unpacking archive");
        archive::unzip(file, &working_directory)?;

        Ok(working_directory)
    }

    /// Held for the whole duration of a save.
    pub fn lock_save(&self) -> MutexGuard<'_, ()> {
        self.save_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lifecycle of an archive-backed document.
pub trait Engine {
    type Configuration;

    fn core(&self) -> &EngineCore;
    fn core_mut(&mut self) -> &mut EngineCore;

    fn configuration(&self) -> Option<&Self::Configuration>;
    fn set_configuration(&mut self, configuration: Self::Configuration);

    fn read_configuration_from<R: Read>(&self, reader: R) -> Result<Self::Configuration, EngineError>;
    fn write_configuration_to<W: Write>(&self, writer: W) -> Result<(), EngineError>;

    fn load_archive(&mut self, file: &Path) -> Result<(), EngineError>;
    fn save_archive(&self, file: &Path) -> Result<(), EngineError>;

    fn archive_extension(&self) -> &'static str {
        self.core().archive_extension()
    }

    fn configuration_filename(&self) -> &'static str {
        self.core().configuration_filename()
    }

    fn archive(&self) -> Option<&Path> {
        self.core().archive()
    }

    fn set_archive(&mut self, file: Option<PathBuf>) {
        self.core_mut().set_archive(file);
    }

    fn working_directory(&self) -> Option<&Path> {
        self.core().working_directory()
    }

    fn set_working_directory(&mut self, directory: Option<PathBuf>) {
        self.core_mut().set_working_directory(directory);
    }

    fn generate_working_directory(&self) -> PathBuf {
        self.core().generate_working_directory()
    }

    fn relativize_from_working_directory(&self, file: &Path) -> Result<String, EngineError> {
        self.core().relativize(file)
    }

    /// Reads `<working-directory>/<configuration-filename>`.
    fn read_configuration(&self) -> Result<Self::Configuration, EngineError> {
        let path = self.core().configuration_path()?;
        self.read_configuration_file(&path)
    }

    fn read_configuration_file(&self, path: &Path) -> Result<Self::Configuration, EngineError> {
        self.core().require_working_directory()?;
        if !path.is_file() {
            return Err(EngineError::MalformedConfiguration(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let reader = BufReader::new(File::open(path)?);
        self.read_configuration_from(reader)
    }

    fn write_configuration(&self) -> Result<(), EngineError> {
        let path = self.core().configuration_path()?;
        self.write_configuration_file(&path)
    }

    fn write_configuration_file(&self, path: &Path) -> Result<(), EngineError> {
        self.core().require_working_directory()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_configuration_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads the archive currently assigned to this engine.
    fn load(&mut self) -> Result<(), EngineError> {
        let file = self
            .archive()
            .map(Path::to_path_buf)
            .ok_or(EngineError::Precondition("No archive is assigned to the engine"))?;
        self.load_archive(&file)
    }

    /// Saves into the archive currently assigned to this engine.
    fn save(&self) -> Result<(), EngineError> {
        let file = self
            .archive()
            .ok_or(EngineError::Precondition("No archive is assigned to the engine"))?;
        self.save_archive(file)
    }
}
