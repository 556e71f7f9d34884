// Append-only success artifact. Writing a line and counting the success
// happen under one lock so the file never disagrees with the ledger.

use crate::ledger::AttemptLedger;
use crate::workflow::types::SessionCredential;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug)]
pub struct SuccessSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl SuccessSink {
    /// Creates the artifact (and its directory) at run start, owner-only
    /// permissions on unix.
    pub async fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // an existing file keeps its old mode on open
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(Self::with_file(path, file))
    }

    fn with_file(path: PathBuf, file: File) -> Self {
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the credential and counts the success in one critical
    /// section. Returns the new success count.
    ///
    /// A credential that would not fit on one line is refused. When the
    /// write or flush fails the file is cut back to its previous length and
    /// nothing is counted.
    pub async fn commit(&self, credential: &SessionCredential, ledger: &AttemptLedger) -> io::Result<u64> {
        let value = credential.expose().trim();
        if value.is_empty() || value.contains(['\n', '\r']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "session credential must be a single non-empty line",
            ));
        }
        let line = format!("{value}\n");

        let mut file = self.file.lock().await;
        let start = file.metadata().await?.len();
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(rollback) = file.set_len(start).await {
                warn!(path = %self.path.display(), error = %rollback, "failed to roll back partial success line");
            }
            return Err(e);
        }
        Ok(ledger.mark_success())
    }
}
