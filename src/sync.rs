use crate::catalog::{self, Catalog};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const USER_AGENT: &str = concat!("patchkit/", env!("CARGO_PKG_VERSION"));
const CATALOG_FILE: &str = "catalog.json";
const TOKEN_FILE: &str = "catalog.etag";

/// What the remote said when asked for the catalog.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The validation token still matches; no body was transferred.
    NotModified,
    Fetched {
        body: String,
        token: Option<String>,
    },
}

/// Conditional-fetch seam. The HTTP implementation sends the previous
/// validation token as `If-None-Match`.
pub trait CatalogRemote {
    fn fetch(&self, token: Option<&str>) -> Result<FetchOutcome>;
}

pub struct HttpCatalogRemote {
    agent: ureq::Agent,
    url: String,
}

impl HttpCatalogRemote {
    pub fn new(url: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();
        Self { agent, url }
    }
}

impl CatalogRemote for HttpCatalogRemote {
    fn fetch(&self, token: Option<&str>) -> Result<FetchOutcome> {
        let mut request = self.agent.get(&self.url).set("User-Agent", USER_AGENT);
        if let Some(token) = token {
            request = request.set("If-None-Match", token);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(304, _)) => return Ok(FetchOutcome::NotModified),
            Err(err) => return Err(err).context("fetch catalog"),
        };

        if response.status() == 304 {
            return Ok(FetchOutcome::NotModified);
        }

        let new_token = response.header("ETag").map(str::to_string);
        let body = response.into_string().context("read catalog body")?;
        Ok(FetchOutcome::Fetched {
            body,
            token: new_token,
        })
    }
}

/// Persisted sync state: last catalog payload plus its validation token.
/// Replaced as a unit after a successful fetch; partial catalog updates
/// never land on disk.
pub struct SyncStore {
    data_dir: PathBuf,
}

impl SyncStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn load_payload(&self) -> Option<String> {
        fs::read_to_string(self.data_dir.join(CATALOG_FILE)).ok()
    }

    pub fn load_token(&self) -> Option<String> {
        let raw = fs::read_to_string(self.data_dir.join(TOKEN_FILE)).ok()?;
        let token = raw.trim().to_string();
        (!token.is_empty()).then_some(token)
    }

    pub fn persist(&self, payload: &str, token: Option<&str>) -> Result<()> {
        fs::create_dir_all(&self.data_dir).context("create data dir")?;
        write_atomic(&self.data_dir.join(CATALOG_FILE), payload)?;
        let token_path = self.data_dir.join(TOKEN_FILE);
        match token {
            Some(token) => fs::write(&token_path, token).context("write catalog token")?,
            None => {
                if token_path.exists() {
                    fs::remove_file(&token_path).context("clear catalog token")?;
                }
            }
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().context("catalog parent dir")?;
    let file_name = path.file_name().context("catalog file name")?;
    let mut temp_name = std::ffi::OsString::from(file_name);
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);
    fs::write(&temp_path, contents).context("write catalog temp file")?;
    fs::rename(&temp_path, path).context("finalize catalog file")?;
    Ok(())
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub catalog: Catalog,
    pub token: Option<String>,
    pub changed: bool,
    /// Set when the remote could not be reached and the cached catalog was
    /// served instead.
    pub fallback: Option<String>,
}

/// Conditional catalog sync. First run (no cached payload) always performs
/// a full fetch; afterwards the stored token short-circuits unchanged data.
/// A network or parse failure degrades to the cached catalog rather than
/// failing startup, surfaced through `fallback`.
pub fn sync(remote: &dyn CatalogRemote, store: &SyncStore) -> Result<SyncOutcome> {
    let cached_payload = store.load_payload();
    let token = match cached_payload {
        Some(_) => store.load_token(),
        // A token without a payload cannot be honored.
        None => None,
    };

    let outcome = match remote.fetch(token.as_deref()) {
        Ok(outcome) => outcome,
        Err(err) => {
            let Some(payload) = cached_payload else {
                return Err(err).context("no cached catalog to fall back to");
            };
            warn!("catalog sync failed, serving cached copy: {err:#}");
            let catalog = catalog::parse_catalog(&payload).context("parse cached catalog")?;
            return Ok(SyncOutcome {
                catalog,
                token,
                changed: false,
                fallback: Some(format!("{err:#}")),
            });
        }
    };

    match outcome {
        FetchOutcome::NotModified => {
            let Some(payload) = cached_payload else {
                bail!("remote replied not-modified but no catalog is cached");
            };
            let catalog = catalog::parse_catalog(&payload).context("parse cached catalog")?;
            info!("catalog unchanged ({} entries)", catalog.entries.len());
            Ok(SyncOutcome {
                catalog,
                token,
                changed: false,
                fallback: None,
            })
        }
        FetchOutcome::Fetched { body, token: new_token } => {
            let catalog = match catalog::parse_catalog(&body) {
                Ok(catalog) => catalog,
                Err(err) => {
                    let Some(payload) = cached_payload else {
                        return Err(err).context("parse fetched catalog");
                    };
                    warn!("fetched catalog is malformed, keeping cached copy: {err}");
                    let catalog =
                        catalog::parse_catalog(&payload).context("parse cached catalog")?;
                    return Ok(SyncOutcome {
                        catalog,
                        token,
                        changed: false,
                        fallback: Some(err.to_string()),
                    });
                }
            };
            store.persist(&body, new_token.as_deref())?;
            info!("catalog updated ({} entries)", catalog.entries.len());
            Ok(SyncOutcome {
                catalog,
                token: new_token,
                changed: true,
                fallback: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Scripted remote that records the token it was offered.
    struct FakeRemote {
        outcome: RefCell<Option<Result<FetchOutcome>>>,
        seen_token: RefCell<Option<Option<String>>>,
    }

    impl FakeRemote {
        fn new(outcome: Result<FetchOutcome>) -> Self {
            Self {
                outcome: RefCell::new(Some(outcome)),
                seen_token: RefCell::new(None),
            }
        }

        fn seen_token(&self) -> Option<Option<String>> {
            self.seen_token.borrow().clone()
        }
    }

    impl CatalogRemote for FakeRemote {
        fn fetch(&self, token: Option<&str>) -> Result<FetchOutcome> {
            *self.seen_token.borrow_mut() = Some(token.map(str::to_string));
            self.outcome
                .borrow_mut()
                .take()
                .expect("fetch called twice")
        }
    }

    const PAYLOAD_V1: &str = r#"{"DevA": {"Game1": {"appid": 100, "files": []}}}"#;
    const PAYLOAD_V2: &str =
        r#"{"DevA": {"Game1": {"appid": 100, "files": [{"id": "f1", "size": 1024}]}}}"#;

    fn store_with(payload: Option<&str>, token: Option<&str>) -> (tempfile::TempDir, SyncStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path().to_path_buf());
        if let Some(payload) = payload {
            store.persist(payload, token).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn first_run_fetches_unconditionally() {
        let (_dir, store) = store_with(None, None);
        let remote = FakeRemote::new(Ok(FetchOutcome::Fetched {
            body: PAYLOAD_V1.to_string(),
            token: Some("\"tok-1\"".to_string()),
        }));

        let outcome = sync(&remote, &store).unwrap();
        assert_eq!(remote.seen_token(), Some(None));
        assert!(outcome.changed);
        assert_eq!(outcome.token.as_deref(), Some("\"tok-1\""));
        assert_eq!(store.load_payload().as_deref(), Some(PAYLOAD_V1));
        assert_eq!(store.load_token().as_deref(), Some("\"tok-1\""));
    }

    #[test]
    fn unchanged_remote_serves_cached_catalog_without_body() {
        let (_dir, store) = store_with(Some(PAYLOAD_V1), Some("\"tok-1\""));
        let remote = FakeRemote::new(Ok(FetchOutcome::NotModified));

        let outcome = sync(&remote, &store).unwrap();
        assert_eq!(
            remote.seen_token(),
            Some(Some("\"tok-1\"".to_string()))
        );
        assert!(!outcome.changed);
        assert!(outcome.fallback.is_none());
        assert_eq!(outcome.token.as_deref(), Some("\"tok-1\""));
        assert_eq!(outcome.catalog.entries[0].app_id, 100);
        assert!(outcome.catalog.entries[0].files.is_empty());
    }

    #[test]
    fn changed_remote_replaces_catalog_and_token() {
        let (_dir, store) = store_with(Some(PAYLOAD_V1), Some("\"tok-1\""));
        let remote = FakeRemote::new(Ok(FetchOutcome::Fetched {
            body: PAYLOAD_V2.to_string(),
            token: Some("\"tok-2\"".to_string()),
        }));

        let outcome = sync(&remote, &store).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.catalog.entries[0].files.len(), 1);
        assert_eq!(store.load_payload().as_deref(), Some(PAYLOAD_V2));
        assert_eq!(store.load_token().as_deref(), Some("\"tok-2\""));
    }

    #[test]
    fn network_failure_falls_back_to_cached_catalog() {
        let (_dir, store) = store_with(Some(PAYLOAD_V1), Some("\"tok-1\""));
        let remote = FakeRemote::new(Err(anyhow::anyhow!("connection refused")));

        let outcome = sync(&remote, &store).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.fallback.is_some());
        assert_eq!(outcome.catalog.entries.len(), 1);
        // The stored state is untouched.
        assert_eq!(store.load_token().as_deref(), Some("\"tok-1\""));
    }

    #[test]
    fn network_failure_without_cache_is_an_error() {
        let (_dir, store) = store_with(None, None);
        let remote = FakeRemote::new(Err(anyhow::anyhow!("connection refused")));
        assert!(sync(&remote, &store).is_err());
    }

    #[test]
    fn malformed_fetch_keeps_cached_catalog() {
        let (_dir, store) = store_with(Some(PAYLOAD_V1), Some("\"tok-1\""));
        let remote = FakeRemote::new(Ok(FetchOutcome::Fetched {
            body: "not json".to_string(),
            token: Some("\"tok-2\"".to_string()),
        }));

        let outcome = sync(&remote, &store).unwrap();
        assert!(!outcome.changed);
        assert!(outcome.fallback.is_some());
        assert_eq!(store.load_payload().as_deref(), Some(PAYLOAD_V1));
        assert_eq!(store.load_token().as_deref(), Some("\"tok-1\""));
    }
}
