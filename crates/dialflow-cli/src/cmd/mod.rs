use anyhow::Context;
use dialflow_core::{
    collab::Collaborators, config::Config, pipeline::Engine, progress::ProgressHub,
    store::SessionStore,
};
use std::path::Path;
use std::sync::Arc;

pub mod callsheet;
pub mod config;
pub mod init;
pub mod serve;
pub mod session;
pub mod signal;

/// Open the engine against the local data root. Commands that touch sessions
/// go through here so store reconciliation runs exactly once per invocation.
pub(crate) fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    let config = Config::load(root).context("failed to load config")?;
    let store =
        Arc::new(SessionStore::open(root, &config).context("failed to open session store")?);
    let hub = Arc::new(ProgressHub::new());
    let collab = Collaborators::local(root);
    Ok(Engine::new(store, hub, collab, config))
}
