use crate::{
    applier::{Applier, ApplyResult},
    cache::ArchiveCache,
    catalog::FileEntry,
    download::HttpStore,
    extract::SevenZip,
};
use anyhow::Result;
use std::{
    path::PathBuf,
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

/// Progress stream for one apply operation.
#[derive(Debug)]
pub enum ApplyMessage {
    Status { file: String, detail: String },
    FileFinished { file: String },
    Completed(ApplyResult),
    Failed { error: String },
}

/// Everything the worker thread needs, owned, so the caller keeps nothing
/// shared with it but the channel.
pub struct ApplyRequest {
    pub files: Vec<FileEntry>,
    pub target_dir: PathBuf,
    pub cache_root: PathBuf,
    pub scratch_root: PathBuf,
    pub download_url_template: String,
}

/// Run one apply on a background thread. The stream always terminates with
/// `Completed` or `Failed`; there is no cancellation.
pub fn spawn_apply(request: ApplyRequest) -> Receiver<ApplyMessage> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let message = match run_apply(&request, &tx) {
            Ok(result) => ApplyMessage::Completed(result),
            Err(err) => ApplyMessage::Failed {
                error: format!("{err:#}"),
            },
        };
        let _ = tx.send(message);
    });
    rx
}

fn run_apply(request: &ApplyRequest, tx: &Sender<ApplyMessage>) -> Result<ApplyResult> {
    let cache = ArchiveCache::open(request.cache_root.clone())?;
    let store = HttpStore::new(request.download_url_template.clone());
    let extractor = SevenZip;
    let applier = Applier::new(&store, &extractor, &cache, request.scratch_root.clone());
    Ok(applier.apply(&request.files, &request.target_dir, Some(tx)))
}
