use anyhow::{Context, Result};
use std::{fs::File, io, path::Path, time::Duration};

const USER_AGENT: &str = concat!("patchkit/", env!("CARGO_PKG_VERSION"));

/// Cloud-storage collaborator: given a remote file identifier, produce a
/// local file. Implementations report not-found, rate-limit, and partial
/// transfer conditions as plain errors.
pub trait ArchiveStore {
    /// Fetch `remote_id` into `dest`, returning the number of bytes written.
    fn fetch(&self, remote_id: &str, dest: &Path) -> Result<u64>;
}

/// HTTP-backed store. The URL template carries an `{id}` placeholder.
pub struct HttpStore {
    agent: ureq::Agent,
    url_template: String,
}

impl HttpStore {
    pub fn new(url_template: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();
        Self {
            agent,
            url_template,
        }
    }
}

impl ArchiveStore for HttpStore {
    fn fetch(&self, remote_id: &str, dest: &Path) -> Result<u64> {
        let url = self.url_template.replace("{id}", remote_id);
        let response = self
            .agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .call()
            .with_context(|| format!("download archive {remote_id}"))?;
        let mut reader = response.into_reader();
        let mut file = File::create(dest).context("create archive file")?;
        let written = io::copy(&mut reader, &mut file).context("write archive file")?;
        Ok(written)
    }
}
