//! Serves files below a document root.

use crate::dispatch::{Handler, HandlerError, Outcome};
use crate::http::mime;
use crate::http::request::{Environment, Method};
use crate::http::response::{Body, ResponseBuilder};
use crate::http::status::StatusCode;
use anyhow::Context;
use std::path::{Component, Path, PathBuf};

/// Answers GET/HEAD for regular files under `root`, streaming the content.
///
/// Missing files are [`Outcome::NoMatch`] so a later handler may answer.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index: String,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: "index.html".to_string(),
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request path onto the filesystem. `None` if it tries to leave
    /// the root.
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

impl Handler for StaticFiles {
    fn call(&self, env: &Environment) -> anyhow::Result<Outcome> {
        if !matches!(env.method(), Method::GET | Method::HEAD) {
            return Ok(Outcome::NoMatch);
        }

        let Some(mut path) = self.resolve(env.path()) else {
            return Err(HandlerError::new(
                StatusCode::FORBIDDEN,
                format!("path escapes document root: {}", env.path()),
            )
            .into());
        };

        if path.is_dir() {
            path.push(&self.index);
        }

        let metadata = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            _ => return Ok(Outcome::NoMatch),
        };

        let file = std::fs::File::open(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let mut response = ResponseBuilder::new(StatusCode::OK)
            .header("Content-Type", mime::from_path(&path))
            .header("Content-Length", metadata.len().to_string());
        if let Ok(modified) = metadata.modified() {
            response = response.header("Last-Modified", httpdate::fmt_http_date(modified));
        }

        tracing::debug!(file = %path.display(), bytes = metadata.len(), "serving static file");

        Ok(Outcome::Response(
            response
                .body(Body::stream(tokio::fs::File::from_std(file)))
                .build(),
        ))
    }
}
