use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model {name} not found in {searched:?} and no download base is configured")]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Where model files are looked up, in order.
#[derive(Clone, Debug)]
pub struct ModelLocations {
    pub model_dir: Option<PathBuf>,
    pub cache_dir: PathBuf,
    /// Base URL; the model name is appended to it.
    pub download_base: Option<String>,
}

impl ModelLocations {
    /// Locations using the per-user cache directory.
    pub fn new(
        model_dir: Option<PathBuf>,
        download_base: Option<String>,
    ) -> Result<Self, ModelResolveError> {
        Ok(Self {
            model_dir,
            cache_dir: model_cache_dir()?,
            download_base,
        })
    }

    /// Resolve a model file by name.
    ///
    /// Resolution order:
    /// 1. Configured model directory
    /// 2. User cache directory (platform-specific)
    /// 3. Download from `download_base` into the cache
    pub fn resolve(
        &self,
        name: &str,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelResolveError> {
        let mut searched = Vec::new();
        if let Some(dir) = &self.model_dir {
            let path = dir.join(name);
            if path.exists() {
                return Ok(path);
            }
            searched.push(dir.clone());
        }

        let cached_path = self.cache_dir.join(name);
        if cached_path.exists() {
            return Ok(cached_path);
        }
        searched.push(self.cache_dir.clone());

        let Some(base) = &self.download_base else {
            return Err(ModelResolveError::NotFound {
                name: name.to_string(),
                searched,
            });
        };

        fs::create_dir_all(&self.cache_dir).map_err(ModelResolveError::CacheDir)?;
        let url = format!("{}/{}", base.trim_end_matches('/'), name);
        log::info!("Downloading {name} from {url}");
        download(&url, &cached_path, progress)?;
        Ok(cached_path)
    }

    /// Like [`resolve`](Self::resolve) but returns `None` instead of
    /// `NotFound` for optional sub-models.
    pub fn resolve_optional(&self, name: &str) -> Result<Option<PathBuf>, ModelResolveError> {
        match self.resolve(name, None) {
            Ok(path) => Ok(Some(path)),
            Err(ModelResolveError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/ClassWatch/models/`
/// - Linux: `$XDG_CACHE_HOME/ClassWatch/models/` or `~/.cache/ClassWatch/models/`
/// - Windows: `%LOCALAPPDATA%/ClassWatch/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join(APP_DIR_NAME).join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path, progress);

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = fs::File::create(temp_path).map_err(|e| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    })?;

    let mut reader = response;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| ModelResolveError::Write {
            path: temp_path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| ModelResolveError::Write {
                path: temp_path.to_path_buf(),
                source: e,
            })?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(|e| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    })?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn locations(tmp: &TempDir, download_base: Option<String>) -> ModelLocations {
        ModelLocations {
            model_dir: Some(tmp.path().join("models")),
            cache_dir: tmp.path().join("cache"),
            download_base,
        }
    }

    #[test]
    fn test_model_dir_wins_over_cache() {
        let tmp = TempDir::new().unwrap();
        let loc = locations(&tmp, None);
        fs::create_dir_all(loc.model_dir.as_ref().unwrap()).unwrap();
        fs::create_dir_all(&loc.cache_dir).unwrap();
        fs::write(loc.model_dir.as_ref().unwrap().join("m.onnx"), b"local").unwrap();
        fs::write(loc.cache_dir.join("m.onnx"), b"cached").unwrap();

        let resolved = loc.resolve("m.onnx", None).unwrap();
        assert_eq!(fs::read(resolved).unwrap(), b"local");
    }

    #[test]
    fn test_falls_back_to_cache() {
        let tmp = TempDir::new().unwrap();
        let loc = locations(&tmp, None);
        fs::create_dir_all(&loc.cache_dir).unwrap();
        fs::write(loc.cache_dir.join("m.onnx"), b"cached").unwrap();

        let resolved = loc.resolve("m.onnx", None).unwrap();
        assert_eq!(resolved, loc.cache_dir.join("m.onnx"));
    }

    #[test]
    fn test_missing_without_download_base_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let loc = locations(&tmp, None);
        let err = loc.resolve("m.onnx", None).unwrap_err();
        match err {
            ModelResolveError::NotFound { name, searched } => {
                assert_eq!(name, "m.onnx");
                assert_eq!(searched.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_optional_returns_none_when_missing() {
        let tmp = TempDir::new().unwrap();
        let loc = locations(&tmp, None);
        assert!(loc.resolve_optional("m.onnx").unwrap().is_none());
    }

    #[test]
    fn test_model_cache_dir_returns_path() {
        let path = model_cache_dir().unwrap();
        assert!(path.to_string_lossy().contains(APP_DIR_NAME));
        assert!(path.to_string_lossy().contains("models"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_downloads_into_cache_with_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models/m.onnx"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let loc = locations(&tmp, Some(format!("{}/models/", server.uri())));
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let resolved = tokio::task::spawn_blocking(move || {
            loc.resolve(
                "m.onnx",
                Some(Box::new(move |_done, _total| {
                    flag.store(true, Ordering::Relaxed);
                })),
            )
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(fs::read(&resolved).unwrap(), b"weights");
        assert!(called.load(Ordering::Relaxed));
        assert!(!resolved.with_extension("part").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_download_leaves_no_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let loc = locations(&tmp, Some(server.uri()));
        let cache = loc.cache_dir.clone();

        let result = tokio::task::spawn_blocking(move || loc.resolve("m.onnx", None))
            .await
            .unwrap();

        assert!(matches!(result, Err(ModelResolveError::Download { .. })));
        assert!(!cache.join("m.onnx").exists());
        assert!(!cache.join("m.part").exists());
    }
}
