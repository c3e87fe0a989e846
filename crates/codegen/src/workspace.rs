//! Writes generated source trees to disk for image builds.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use botforge_core::GeneratedSource;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("generated path `{0}` escapes the bot directory")]
    InvalidPath(String),
    #[error("workspace io at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// On-disk home for generated bot sources. Each bot gets one directory named
/// after its slug, recreated from scratch on every generation pass.
#[derive(Clone, Debug)]
pub struct SourceWorkspace {
    root: PathBuf,
}

impl SourceWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bot_dir(&self, slug: &str) -> PathBuf {
        self.root.join(slug)
    }

    /// Replaces the bot's source tree with `source` and returns the directory
    /// written. A stale tree from an earlier attempt is removed first so a
    /// retry never builds from mixed output.
    pub async fn materialize(
        &self,
        slug: &str,
        source: &GeneratedSource,
    ) -> Result<PathBuf, WorkspaceError> {
        for path in source.files.keys() {
            let relative = Path::new(path);
            let escapes = relative.is_absolute()
                || relative.components().any(|part| !matches!(part, Component::Normal(_)));
            if escapes {
                return Err(WorkspaceError::InvalidPath(path.clone()));
            }
        }

        let dir = self.bot_dir(slug);
        if tokio::fs::try_exists(&dir).await.map_err(|error| WorkspaceError::io(&dir, error))? {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|error| WorkspaceError::io(&dir, error))?;
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|error| WorkspaceError::io(&dir, error))?;

        for (path, contents) in &source.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|error| WorkspaceError::io(parent, error))?;
            }
            tokio::fs::write(&target, contents)
                .await
                .map_err(|error| WorkspaceError::io(&target, error))?;
        }

        debug!(
            event_name = "codegen.workspace_written",
            slug,
            files = source.len(),
            directory = %dir.display(),
        );
        Ok(dir)
    }
}
