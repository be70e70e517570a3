//! # Static Files
//!
//! Collaborator that owns the response for paths configured as static. The
//! dispatcher hands such requests over before routing and never looks at
//! what was written.

use crate::connection::Connection;
use crate::error::Result;
use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Serves requests for static paths
pub trait StaticFiles: Send + Sync {
    /// Write the response for a static request
    fn handle<'a>(
        &'a self,
        connection: &'a Connection,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Serves files from a directory on disk
#[derive(Debug, Clone)]
pub struct DirStaticFiles {
    root: PathBuf,
}

impl DirStaticFiles {
    /// Serve files under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a request path onto the root, refusing anything that would leave it
    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let relative = Path::new(uri.trim_start_matches('/'));
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            .then(|| self.root.join(relative))
    }

    async fn serve(&self, request: &Request, response: &mut Response) -> Result<()> {
        let Some(path) = self.resolve(request.uri()) else {
            warn!(uri = request.uri(), "Static path escapes root");
            response.set_status(403);
            return response.text("Forbidden");
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return not_found(response),
            Err(e) if e.kind() == ErrorKind::NotFound => return not_found(response),
            Err(e) => return Err(e.into()),
        }

        let content = tokio::fs::read(&path).await?;
        debug!(path = %path.display(), bytes = content.len(), "Serving static file");
        response.set_content_type(content_type(&path));
        response.write(content)
    }
}

impl StaticFiles for DirStaticFiles {
    fn handle<'a>(
        &'a self,
        _connection: &'a Connection,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.serve(request, response))
    }
}

fn not_found(response: &mut Response) -> Result<()> {
    response.not_found();
    response.text("Not Found")
}

/// MIME type by file extension
fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js" | "mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Method;

    async fn serve(files: &DirStaticFiles, uri: &str) -> Response {
        let request = Request::new(Method::Get, uri);
        let mut response = Response::new();
        files
            .handle(request.connection(), &request, &mut response)
            .await
            .unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_file_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        std::fs::write(dir.path().join("static/app.css"), "body{}").unwrap();
        let files = DirStaticFiles::new(dir.path());

        let response = serve(&files, "/static/app.css").await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.content_type(), "text/css");
        assert_eq!(response.body_text(), "body{}");
    }

    #[tokio::test]
    async fn test_missing_file_and_directory_are_404() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("static")).unwrap();
        let files = DirStaticFiles::new(dir.path());

        assert_eq!(serve(&files, "/static/none.js").await.status(), 404);
        assert_eq!(serve(&files, "/static").await.status(), 404);
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = DirStaticFiles::new(dir.path());

        let response = serve(&files, "/static/../../etc/passwd").await;
        assert_eq!(response.status(), 403);
        assert!(response.is_committed());
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(content_type(Path::new("a.bin")), "application/octet-stream");
        assert_eq!(content_type(Path::new("favicon.ico")), "image/x-icon");
    }
}
