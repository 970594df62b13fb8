use dialflow_core::collab::Collaborators;
use dialflow_core::config::Config;
use dialflow_core::pipeline::Engine;
use dialflow_core::progress::ProgressHub;
use dialflow_core::signals::SignalLedger;
use dialflow_core::store::SessionStore;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Shared application state passed to all route handlers.
///
/// The store and progress hub are opened once here so every request sees the
/// same in-memory session layer and the same event sequences.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub engine: Arc<Engine>,
    pub ledger: Arc<Mutex<SignalLedger>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(root: PathBuf) -> dialflow_core::Result<Self> {
        let config = Config::load(&root)?;
        let store = Arc::new(SessionStore::open(&root, &config)?);
        let hub = Arc::new(ProgressHub::new());

        let mut collab = Collaborators::local(&root);
        match std::env::var("DIALFLOW_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => {
                tracing::info!("dial-plan notifications will post to the configured webhook");
                collab.notifier = Arc::new(crate::notify::WebhookNotifier::new(url));
            }
            _ => {}
        }

        let ledger = SignalLedger::load(&root, &config);
        let engine = Arc::new(Engine::new(store, hub, collab, config));

        Ok(Self {
            root,
            engine,
            ledger: Arc::new(Mutex::new(ledger)),
        })
    }
}
