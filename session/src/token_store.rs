use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read as _;
use std::io::Write as _;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::config::TokenStorage;
use crate::token_data::Tokens;

/// Name of the token file kept under the client's home directory when the
/// storage mode is [`TokenStorage::SessionStorage`].
pub const SESSION_FILE: &str = "session.json";

/// Backing store for the tokens of a session.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    fn load(&self) -> std::io::Result<Option<Tokens>>;
    fn save(&self, tokens: &Tokens) -> std::io::Result<()>;
    /// Removes any stored tokens. Returns `true` if something was removed.
    fn clear(&self) -> std::io::Result<bool>;
}

/// Builds the store matching the configured storage mode.
pub fn token_store_for(storage: TokenStorage, home: &Path) -> Arc<dyn TokenStore> {
    match storage {
        TokenStorage::Memory => Arc::new(MemoryTokenStore::default()),
        TokenStorage::SessionStorage => Arc::new(FileTokenStore::new(home.join(SESSION_FILE))),
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<Tokens>>,
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> std::io::Result<Option<Tokens>> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tokens: &Tokens) -> std::io::Result<()> {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> std::io::Result<bool> {
        Ok(self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some())
    }
}

/// Tokens persisted as pretty JSON in a file only the current user can read.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> std::io::Result<Option<Tokens>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let tokens: Tokens = serde_json::from_str(&contents)?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &Tokens) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json_data = serde_json::to_string_pretty(tokens)?;
        let mut options = OpenOptions::new();
        options.truncate(true).write(true).create(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(json_data.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn clear(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
