//! Backing storage for the config store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConfigError;

/// File permissions for the config file (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Where the serialized config lives. Implementations store raw JSON text;
/// versioning and decoding are the store's business.
pub trait Persistor: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<String>, ConfigError>;

    fn save(&self, contents: &str) -> Result<(), ConfigError>;
}

/// JSON file on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct DiskPersistor {
    path: PathBuf,
}

impl DiskPersistor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("config.json");
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
    }

    fn write_err(&self, source: io::Error) -> ConfigError {
        ConfigError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl Persistor for DiskPersistor {
    fn load(&self) -> Result<Option<String>, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, contents: &str) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
            }
        }

        // Write beside the target and rename so readers never see a partial file.
        let tmp = self.temp_path();
        fs::write(&tmp, contents).map_err(|e| self.write_err(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(FILE_MODE)).map_err(|e| self.write_err(e))?;
        }

        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            self.write_err(e)
        })
    }
}

/// In-process storage. Clones share the same contents, so handing a clone to
/// a second store behaves like re-reading the file after a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistor {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryPersistor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(contents.into()))),
        }
    }

    /// Last saved JSON, if any.
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl Persistor for MemoryPersistor {
    fn load(&self) -> Result<Option<String>, ConfigError> {
        Ok(self.contents.lock().clone())
    }

    fn save(&self, contents: &str) -> Result<(), ConfigError> {
        *self.contents.lock() = Some(contents.to_string());
        Ok(())
    }
}
