use std::sync::Arc;

use crate::config::JobSettings;
use crate::services::{
    identity::IdentityVerifier,
    jobs::JobService,
    queue::JobQueue,
    state_store::StateStore,
    storage::BlobStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn JobQueue>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn JobQueue>,
        blobs: Arc<dyn BlobStore>,
        verifier: Arc<dyn IdentityVerifier>,
        settings: JobSettings,
    ) -> Self {
        Self {
            jobs: Arc::new(JobService::new(store.clone(), queue.clone(), blobs, settings)),
            store,
            queue,
            verifier,
        }
    }
}
