//! Integrity verification of library artifacts.
//!
//! A library is usable once a local copy with the expected digest exists.
//! The verifier checks the declared local path and the shared cache first,
//! and only then tries the download mirrors in order. Concurrent requests
//! for the same artifact are coalesced into a single transfer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use rayon::prelude::*;
use thiserror::Error;
use url::Url;

use crate::core::node::{LibraryHash, LibrarySource};
use crate::sources::cache::LibraryCache;
use crate::sources::fetch::{Fetcher, TransferError};
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::env::expand_env;
use crate::util::fs::{copy_atomic, ensure_dir, file_name_of, temp_file_beside};
use crate::util::hash::{hash_file, sha256_str, short_digest, Checksum};

/// Failure to obtain a verified copy of a library.
#[derive(Debug, Clone, PartialEq, Eq, Error, miette::Diagnostic)]
pub enum VerifyError {
    #[error("`{library}`: content from {source_location} does not match {expected}")]
    #[diagnostic(code(berth::verify::integrity))]
    IntegrityFailure {
        library: String,
        source_location: String,
        expected: String,
        actual: String,
    },

    #[error("`{library}` could not be downloaded from any of its {} URL(s)", attempts.len())]
    #[diagnostic(code(berth::verify::unresolved))]
    UnresolvedLibrary {
        library: String,
        attempts: Vec<TransferError>,
    },

    #[error("`{library}`: {message}")]
    #[diagnostic(code(berth::verify::local))]
    Local { library: String, message: String },
}

impl VerifyError {
    pub fn library(&self) -> &str {
        match self {
            VerifyError::IntegrityFailure { library, .. }
            | VerifyError::UnresolvedLibrary { library, .. }
            | VerifyError::Local { library, .. } => library,
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            VerifyError::IntegrityFailure {
                library,
                source_location,
                expected,
                actual,
            } => Diagnostic::error(format!("integrity check failed for `{}`", library))
                .with_context(format!("source:   {}", source_location))
                .with_context(format!("expected: {}", expected))
                .with_context(format!("actual:   {}", actual))
                .with_suggestion("Check whether the mirror serves a different file")
                .with_suggestion("Update the digest in the manifest if the artifact changed legitimately"),

            VerifyError::UnresolvedLibrary { library, attempts } => {
                let mut diag = Diagnostic::error(format!("could not download `{}`", library));
                for attempt in attempts {
                    diag = diag.with_context(attempt.to_string());
                }
                diag.with_suggestion(suggestions::FETCH_FAILED)
            }

            VerifyError::Local { library, message } => {
                Diagnostic::error(format!("library `{}` is not available", library))
                    .with_context(message.clone())
            }
        }
    }
}

/// One library of the build set to verify.
#[derive(Debug, Clone)]
pub struct LibraryRequest {
    /// Graph label, used in messages.
    pub label: String,
    /// Source after platform variants were applied.
    pub source: LibrarySource,
    /// Directory relative paths resolve against.
    pub suite_dir: PathBuf,
}

type Shared = Arc<OnceLock<Result<PathBuf, VerifyError>>>;

/// Verifies and downloads libraries into a [`LibraryCache`].
pub struct Verifier {
    cache: LibraryCache,
    fetcher: Arc<dyn Fetcher>,
    in_flight: Mutex<HashMap<String, Shared>>,
}

impl Verifier {
    pub fn new(cache: LibraryCache, fetcher: Arc<dyn Fetcher>) -> Self {
        Verifier {
            cache,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &LibraryCache {
        &self.cache
    }

    /// Return a verified local path for one library.
    pub fn verify(&self, request: &LibraryRequest) -> Result<PathBuf, VerifyError> {
        let local = self.local_path(request)?;
        let source = &request.source;

        let key = match &source.hash {
            Some(LibraryHash::Checked(checksum)) => format!("{}|{:?}", checksum, local),
            _ => format!("{}|{:?}|{:?}", request.label, local, source.urls),
        };

        let shared: Shared = {
            let mut in_flight = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            in_flight.entry(key).or_default().clone()
        };

        shared
            .get_or_init(|| match &source.hash {
                Some(LibraryHash::Checked(checksum)) => {
                    self.verify_checked(request, checksum, local.as_deref())
                }
                Some(LibraryHash::Unchecked) => self.obtain_unchecked(request, local.as_deref()),
                None => self.require_local(request, local.as_deref()),
            })
            .clone()
    }

    /// Verify every request on a pool of `jobs` threads.
    ///
    /// Results come back in request order.
    pub fn verify_all(
        &self,
        requests: &[LibraryRequest],
        jobs: usize,
    ) -> Vec<(String, Result<PathBuf, VerifyError>)> {
        let run = || -> Vec<(String, Result<PathBuf, VerifyError>)> {
            requests
                .par_iter()
                .map(|r| (r.label.clone(), self.verify(r)))
                .collect()
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => {
                tracing::warn!("Failed to start verification pool, verifying serially: {}", e);
                requests
                    .iter()
                    .map(|r| (r.label.clone(), self.verify(r)))
                    .collect()
            }
        }
    }

    fn local_path(&self, request: &LibraryRequest) -> Result<Option<PathBuf>, VerifyError> {
        let Some(raw) = request.source.path.as_deref() else {
            return Ok(None);
        };
        let expanded = expand_env(raw).map_err(|e| VerifyError::Local {
            library: request.label.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(request.suite_dir.join(expanded)))
    }

    fn verify_checked(
        &self,
        request: &LibraryRequest,
        checksum: &Checksum,
        local: Option<&Path>,
    ) -> Result<PathBuf, VerifyError> {
        let library = request.label.as_str();
        let io = |e: anyhow::Error| VerifyError::Local {
            library: library.to_string(),
            message: format!("{:#}", e),
        };

        if let Some(local) = local.filter(|p| p.is_file()) {
            let actual = hash_file(checksum.algorithm(), local).map_err(io)?;
            if actual == checksum.digest() {
                tracing::debug!("`{}` is up to date at {}", library, local.display());
                return Ok(local.to_path_buf());
            }
            if request.source.urls.is_empty() {
                return Err(integrity_failure(library, &local.display().to_string(), checksum, actual));
            }
            tracing::warn!("`{}` at {} has a stale digest, fetching again", library, local.display());
        }

        let file_name = artifact_file_name(request, local);
        let cached = match self.cache.lookup(checksum, &file_name).map_err(io)? {
            Some(path) => {
                tracing::debug!("Cache hit for `{}` ({})", library, short_digest(checksum.digest()));
                path
            }
            None => {
                if request.source.urls.is_empty() {
                    return Err(VerifyError::Local {
                        library: library.to_string(),
                        message: match local {
                            Some(p) => format!("`{}` does not exist", p.display()),
                            None => "no local path or download URL".to_string(),
                        },
                    });
                }
                self.download(request, checksum, &file_name)?
            }
        };

        match local {
            Some(local) => {
                copy_atomic(&cached, local).map_err(io)?;
                Ok(local.to_path_buf())
            }
            None => Ok(cached),
        }
    }

    /// Try each mirror in order; a mismatch stops the search.
    fn download(
        &self,
        request: &LibraryRequest,
        checksum: &Checksum,
        file_name: &str,
    ) -> Result<PathBuf, VerifyError> {
        let library = request.label.as_str();
        let io = |e: anyhow::Error| VerifyError::Local {
            library: library.to_string(),
            message: format!("{:#}", e),
        };

        let _lock = self.cache.lock(checksum).map_err(io)?;

        // Another process may have finished the download while we waited.
        if let Some(path) = self.cache.lookup(checksum, file_name).map_err(io)? {
            return Ok(path);
        }

        let mut attempts = Vec::new();
        for url in &request.source.urls {
            let staged = self.cache.staging_file().map_err(io)?;
            if let Err(e) = self.fetcher.fetch(url, staged.path()) {
                tracing::warn!("{}", e);
                attempts.push(e);
                continue;
            }

            let actual = hash_file(checksum.algorithm(), staged.path()).map_err(io)?;
            if actual != checksum.digest() {
                return Err(integrity_failure(library, url.as_str(), checksum, actual));
            }

            tracing::info!("Verified `{}` ({})", library, checksum);
            return self.cache.store(checksum, file_name, staged).map_err(io);
        }

        Err(VerifyError::UnresolvedLibrary {
            library: library.to_string(),
            attempts,
        })
    }

    fn obtain_unchecked(&self, request: &LibraryRequest, local: Option<&Path>) -> Result<PathBuf, VerifyError> {
        let library = request.label.as_str();
        if let Some(local) = local.filter(|p| p.exists()) {
            return Ok(local.to_path_buf());
        }
        if request.source.urls.is_empty() {
            return self.require_local(request, local);
        }

        let file_name = artifact_file_name(request, local);
        let dest = match local {
            Some(local) => local.to_path_buf(),
            None => self
                .cache
                .unchecked_path(&sha256_str(library)[..16], &file_name),
        };
        if dest.exists() {
            return Ok(dest);
        }

        let io = |e: anyhow::Error| VerifyError::Local {
            library: library.to_string(),
            message: format!("{:#}", e),
        };
        if let Some(parent) = dest.parent() {
            ensure_dir(parent).map_err(io)?;
        }

        let mut attempts = Vec::new();
        for url in &request.source.urls {
            let staged = temp_file_beside(&dest).map_err(io)?;
            match self.fetcher.fetch(url, staged.path()) {
                Ok(()) => {
                    tracing::info!("Downloaded `{}` without verification", library);
                    staged
                        .persist(&dest)
                        .map_err(|e| io(anyhow::Error::new(e.error)))?;
                    return Ok(dest);
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    attempts.push(e);
                }
            }
        }
        Err(VerifyError::UnresolvedLibrary {
            library: library.to_string(),
            attempts,
        })
    }

    fn require_local(&self, request: &LibraryRequest, local: Option<&Path>) -> Result<PathBuf, VerifyError> {
        match local {
            Some(path) if path.exists() => Ok(path.to_path_buf()),
            Some(path) => Err(VerifyError::Local {
                library: request.label.clone(),
                message: format!("`{}` does not exist", path.display()),
            }),
            None => Err(VerifyError::Local {
                library: request.label.clone(),
                message: "no local path or download URL".to_string(),
            }),
        }
    }
}

fn integrity_failure(library: &str, location: &str, checksum: &Checksum, actual: String) -> VerifyError {
    VerifyError::IntegrityFailure {
        library: library.to_string(),
        source_location: location.to_string(),
        expected: checksum.to_string(),
        actual: format!("{}:{}", checksum.algorithm(), actual),
    }
}

/// File name an artifact is stored under in the cache.
fn artifact_file_name(request: &LibraryRequest, local: Option<&Path>) -> String {
    local
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .or_else(|| {
            request
                .source
                .urls
                .first()
                .map(Url::path)
                .and_then(file_name_of)
                .map(str::to_string)
        })
        .unwrap_or_else(|| request.label.replace(':', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockFetcher;
    use crate::util::hash::{sha1_bytes, HashAlgorithm};
    use tempfile::TempDir;

    fn checked(data: &[u8]) -> Option<LibraryHash> {
        Some(LibraryHash::Checked(
            Checksum::new(HashAlgorithm::Sha1, &sha1_bytes(data)).unwrap(),
        ))
    }

    fn request(dir: &Path, path: Option<&str>, urls: &[&str], hash: Option<LibraryHash>) -> LibraryRequest {
        LibraryRequest {
            label: "ANTLR".to_string(),
            source: LibrarySource {
                path: path.map(str::to_string),
                urls: urls.iter().map(|u| Url::parse(u).unwrap()).collect(),
                hash,
            },
            suite_dir: dir.to_path_buf(),
        }
    }

    fn verifier(tmp: &TempDir, fetcher: Arc<MockFetcher>) -> Verifier {
        Verifier::new(LibraryCache::new(tmp.path().join("cache")), fetcher)
    }

    #[test]
    fn test_download_and_cache_hit() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(
            MockFetcher::new().serve("https://mirror.example.com/antlr.jar", b"antlr"),
        );
        let v = verifier(&tmp, fetcher.clone());
        let req = request(tmp.path(), None, &["https://mirror.example.com/antlr.jar"], checked(b"antlr"));

        let path = v.verify(&req).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"antlr");
        assert!(path.ends_with("antlr.jar"));
        assert_eq!(fetcher.count(), 1);

        // A fresh verifier over the same cache needs no network.
        let again = verifier(&tmp, fetcher.clone()).verify(&req).unwrap();
        assert_eq!(again, path);
        assert_eq!(fetcher.count(), 1);
    }

    #[test]
    fn test_transfer_failure_falls_back_to_next_mirror() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new().serve("https://b.example.com/antlr.jar", b"antlr"));
        let v = verifier(&tmp, fetcher.clone());
        let req = request(
            tmp.path(),
            None,
            &["https://a.example.com/antlr.jar", "https://b.example.com/antlr.jar"],
            checked(b"antlr"),
        );

        assert!(v.verify(&req).is_ok());
        assert_eq!(fetcher.count(), 2);
    }

    #[test]
    fn test_mismatch_is_fatal_without_trying_more_mirrors() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(
            MockFetcher::new()
                .serve("https://a.example.com/antlr.jar", b"evil")
                .serve("https://b.example.com/antlr.jar", b"antlr"),
        );
        let v = verifier(&tmp, fetcher.clone());
        let req = request(
            tmp.path(),
            None,
            &["https://a.example.com/antlr.jar", "https://b.example.com/antlr.jar"],
            checked(b"antlr"),
        );

        let err = v.verify(&req).unwrap_err();
        assert!(matches!(err, VerifyError::IntegrityFailure { .. }));
        assert_eq!(fetcher.count(), 1);
    }

    #[test]
    fn test_all_mirrors_failed() {
        let tmp = TempDir::new().unwrap();
        let v = verifier(&tmp, Arc::new(MockFetcher::new()));
        let req = request(
            tmp.path(),
            None,
            &["https://a.example.com/x.jar", "https://b.example.com/x.jar"],
            checked(b"x"),
        );

        match v.verify(&req).unwrap_err() {
            VerifyError::UnresolvedLibrary { attempts, .. } => assert_eq!(attempts.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_local_copy_with_matching_hash_skips_network() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("lib")).unwrap();
        std::fs::write(tmp.path().join("lib/antlr.jar"), b"antlr").unwrap();

        let fetcher = Arc::new(MockFetcher::new());
        let v = verifier(&tmp, fetcher.clone());
        let req = request(
            tmp.path(),
            Some("lib/antlr.jar"),
            &["https://a.example.com/antlr.jar"],
            checked(b"antlr"),
        );

        assert_eq!(v.verify(&req).unwrap(), tmp.path().join("lib/antlr.jar"));
        assert_eq!(fetcher.count(), 0);
    }

    #[test]
    fn test_download_is_copied_to_declared_path() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new().serve("https://a.example.com/antlr.jar", b"antlr"));
        let v = verifier(&tmp, fetcher);
        let req = request(
            tmp.path(),
            Some("lib/antlr.jar"),
            &["https://a.example.com/antlr.jar"],
            checked(b"antlr"),
        );

        let path = v.verify(&req).unwrap();
        assert_eq!(path, tmp.path().join("lib/antlr.jar"));
        assert_eq!(std::fs::read(path).unwrap(), b"antlr");
    }

    #[test]
    fn test_nocheck_skips_verification() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new().serve("https://a.example.com/any.jar", b"whatever"));
        let v = verifier(&tmp, fetcher);
        let req = request(
            tmp.path(),
            None,
            &["https://a.example.com/any.jar"],
            Some(LibraryHash::Unchecked),
        );

        let path = v.verify(&req).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"whatever");
    }

    #[test]
    fn test_local_only_library_must_exist() {
        let tmp = TempDir::new().unwrap();
        let v = verifier(&tmp, Arc::new(MockFetcher::new()));
        let req = request(tmp.path(), Some("lib/tools.jar"), &[], None);

        assert!(matches!(v.verify(&req), Err(VerifyError::Local { .. })));
    }

    #[test]
    fn test_concurrent_requests_are_coalesced() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new().serve("https://a.example.com/antlr.jar", b"antlr"));
        let v = verifier(&tmp, fetcher.clone());
        let req = request(tmp.path(), None, &["https://a.example.com/antlr.jar"], checked(b"antlr"));
        let requests = vec![req.clone(), req.clone(), req.clone(), req];

        let results = v.verify_all(&requests, 4);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(fetcher.count(), 1);
    }

    #[test]
    fn test_callers_wait_on_the_transfer_in_progress() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(
            MockFetcher::new()
                .serve("https://a.example.com/antlr.jar", b"antlr")
                .held(),
        );
        let v = verifier(&tmp, fetcher.clone());
        let req = request(tmp.path(), None, &["https://a.example.com/antlr.jar"], checked(b"antlr"));
        let callers = 4;
        let barrier = std::sync::Barrier::new(callers + 1);

        let results: Vec<Result<PathBuf, VerifyError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..callers)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        v.verify(&req)
                    })
                })
                .collect();

            // Every caller is inside `verify` while the first transfer is held.
            barrier.wait();
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
            while fetcher.count() == 0 && std::time::Instant::now() < deadline {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            std::thread::sleep(std::time::Duration::from_millis(200));
            assert_eq!(fetcher.count(), 1);
            fetcher.release();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fetcher.count(), 1);
    }
}
