//! Backend abstraction layer
//!
//! The domain layer talks to a [`Backend`]: the REST server over HTTP in
//! normal use, or a local snapshot for offline work and tests.

mod http;
mod local;
mod traits;

pub use http::{HttpBackend, DEFAULT_TIMEOUT};
pub use local::LocalBackend;
pub use traits::{Backend, BackendType, Result};

use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;

/// Creates a backend from a profile URL
///
/// `http://` and `https://` URLs select the REST backend; `file://` selects
/// a local snapshot persisted at that path. `timeout` bounds each HTTP
/// request.
pub fn create_backend(
    url: &str,
    token: Option<String>,
    timeout: Duration,
) -> Result<Arc<dyn Backend>> {
    if let Some(path) = url.strip_prefix("file://") {
        if path.is_empty() {
            return Err(BackendError::Storage("file:// URL has no path".into()));
        }
        return Ok(Arc::new(LocalBackend::open(path)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Arc::new(HttpBackend::with_timeout(url, token, timeout)?));
    }
    Err(BackendError::Network(format!(
        "Unsupported backend URL '{}' (expected http://, https:// or file://)",
        url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend_from_url() {
        let http = create_backend("http://localhost:8080/api", None, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(http.backend_type(), BackendType::Http);

        let temp_dir = tempfile::TempDir::new().unwrap();
        let url = format!("file://{}", temp_dir.path().join("inv.yaml").display());
        let local = create_backend(&url, None, DEFAULT_TIMEOUT).unwrap();
        assert_eq!(local.backend_type(), BackendType::Local);

        assert!(create_backend("ftp://example.com", None, DEFAULT_TIMEOUT).is_err());
    }
}
