//! Google Firebase store integration
//!
//! Two independent flows share one document store:
//!
//! - the [`StateMirror`] writes every qualifying `state_changed` event to
//!   `homeassistant/<entity_id>`
//! - the [`CommandBridge`] watches a collection and turns each added or
//!   modified document into a service call for the entity it names
//!
//! ```yaml
//! google_firebase_store:
//!   credentials_json: firebase-adminsdk.json
//!   web_token: !secret ha_token
//!   filter:
//!     include_domains: [light, switch]
//! ```

mod bridge;
mod config;
mod error;
mod mirror;

use ha_core::events::{StateChangedData, STATE_CHANGED};
use ha_core::State;
use ha_document_store::{DocumentStore, FirestoreStore, ServiceAccount};
use ha_entity_filter::EntityFilter;
use ha_event_bus::{ListenerId, SharedEventBus};
use ha_remote::{RestClient, ServiceCaller};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use bridge::{BatchReport, CommandBridge, TRIGGER_FIELD};
pub use config::{FirebaseStoreConfig, ServiceTarget, DEFAULT_WATCH_COLLECTION};
pub use error::{BridgeError, SetupError};
pub use mirror::{StateMirror, MIRROR_COLLECTION};

pub const DOMAIN: &str = "google_firebase_store";

/// Set up the integration against Cloud Firestore
///
/// Fails with [`SetupError::CredentialsNotFound`] when the credentials
/// file is missing. Without a `web_token` only the mirror runs.
pub async fn setup(
    bus: SharedEventBus,
    config: &FirebaseStoreConfig,
    config_dir: &Path,
) -> Result<FirebaseStore, SetupError> {
    let credentials = config.credentials_path(config_dir);
    if !credentials.exists() {
        error!(path = %credentials.display(), "Firebase credentials file not found");
        return Err(SetupError::CredentialsNotFound(credentials));
    }

    let account = ServiceAccount::from_file(&credentials)?;
    info!(project = %account.project_id, "Connecting to Firestore");
    let store = FirestoreStore::from_service_account(account)?
        .with_poll_interval(config.poll_interval);

    let caller: Option<Arc<dyn ServiceCaller>> = match &config.web_token {
        Some(token) => Some(Arc::new(RestClient::new(
            &config.base_url,
            Some(token.clone()),
        )?)),
        None => None,
    };

    FirebaseStore::start(config, bus, Arc::new(store), caller).await
}

/// A running integration
pub struct FirebaseStore {
    bus: SharedEventBus,
    listener: ListenerId,
    writer: JoinHandle<()>,
    bridge: Option<JoinHandle<()>>,
}

impl FirebaseStore {
    /// Start both flows against an arbitrary store and service caller
    ///
    /// The command bridge only starts when a `caller` is given.
    pub async fn start(
        config: &FirebaseStoreConfig,
        bus: SharedEventBus,
        store: Arc<dyn DocumentStore>,
        caller: Option<Arc<dyn ServiceCaller>>,
    ) -> Result<Self, SetupError> {
        let filter = EntityFilter::new(&config.filter)?;
        if filter.is_allow_all() {
            debug!("No filter configured, mirroring every entity");
        }
        let mirror = Arc::new(StateMirror::new(filter, store.clone()));

        let bridge = match caller {
            Some(caller) => {
                let watch = store.watch(&config.watch_collection).await?;
                let bridge = CommandBridge::new(
                    caller,
                    store.clone(),
                    &config.watch_collection,
                    config.service.clone(),
                )
                .with_require_marker(config.require_marker);
                info!(
                    collection = %config.watch_collection,
                    service = %config.service,
                    "Command bridge started"
                );
                Some(tokio::spawn(bridge.run(watch)))
            }
            None => {
                warn!("No web_token configured, command bridge disabled");
                None
            }
        };

        // Filtering happens inline on the firing thread; writes are
        // handed to one task so they land in event order.
        let (tx, mut rx) = mpsc::unbounded_channel::<State>();
        let listener_mirror = mirror.clone();
        let listener = bus.listen(STATE_CHANGED, move |event| {
            let data: StateChangedData = match serde_json::from_value(event.data.clone()) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "Malformed state_changed event");
                    return;
                }
            };
            if let Some(state) = listener_mirror.evaluate(&data) {
                let _ = tx.send(state);
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(state) = rx.recv().await {
                if let Err(e) = mirror.write(&state).await {
                    error!(entity_id = %state.entity_id, error = %e, "Failed to mirror state");
                }
            }
        });

        info!("Firebase store integration started");
        Ok(Self {
            bus,
            listener,
            writer,
            bridge,
        })
    }

    pub fn bridge_running(&self) -> bool {
        self.bridge.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop listening, finish pending mirror writes and stop the bridge
    pub async fn shutdown(self) {
        self.bus.remove_listener(self.listener);
        if let Some(bridge) = self.bridge {
            bridge.abort();
            let _ = bridge.await;
        }
        let _ = self.writer.await;
        info!("Firebase store integration stopped");
    }
}
