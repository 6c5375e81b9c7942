use std::path::PathBuf;

use bytes::Bytes;
use cache_types::AccessMode;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Which editor to hand the scratch file to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorKind {
    Vim,
    Emacs,
}

impl EditorKind {
    fn program(&self) -> &'static str {
        match self {
            EditorKind::Vim => "vim",
            EditorKind::Emacs => "emacs",
        }
    }
}

/// Materializes cached bytes into a scratch file, hands it to the editor
/// with the terminal attached, and reads the result back for write
/// sessions. The scratch file's permissions reflect the session mode, so a
/// read checkout cannot be edited by accident.
pub struct Editor {
    program: String,
    scratch: PathBuf,
}

impl Editor {
    pub fn new(kind: EditorKind, scratch: PathBuf) -> Self {
        Editor {
            program: kind.program().to_string(),
            scratch,
        }
    }

    /// Editor with an arbitrary program name; the program receives the
    /// scratch path as its single argument.
    pub fn with_program(program: impl Into<String>, scratch: PathBuf) -> Self {
        Editor {
            program: program.into(),
            scratch,
        }
    }

    /// Per-process default scratch path in the system temp directory.
    pub fn default_scratch() -> PathBuf {
        std::env::temp_dir().join(format!("file_cache_scratch_{}.txt", std::process::id()))
    }

    /// Runs one edit session. Returns the edited bytes for a write session,
    /// `None` for a read-only one.
    pub async fn edit(&self, bytes: &Bytes, mode: AccessMode) -> Result<Option<Bytes>> {
        self.materialize(bytes, mode).await?;

        debug!("launching {} on {:?}", self.program, self.scratch);
        let status = Command::new(&self.program)
            .arg(&self.scratch)
            .status()
            .await
            .map_err(|e| ClientError::Editor(format!("failed to launch {}: {e}", self.program)))?;
        if !status.success() {
            return Err(ClientError::Editor(format!("{} exited with {status}", self.program)));
        }

        if mode.is_write() {
            let edited = tokio::fs::read(&self.scratch).await?;
            Ok(Some(Bytes::from(edited)))
        } else {
            Ok(None)
        }
    }

    async fn materialize(&self, bytes: &Bytes, mode: AccessMode) -> Result<()> {
        // a leftover read-only scratch file from a previous session must be
        // writable before it can be replaced
        set_mode(&self.scratch, 0o600)?;
        tokio::fs::write(&self.scratch, bytes).await?;
        set_mode(&self.scratch, if mode.is_write() { 0o600 } else { 0o400 })?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> Result<()> {
    Ok(())
}
