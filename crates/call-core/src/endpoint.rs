//! Protocol endpoint contract and the attached-endpoint collection.
//!
//! An endpoint is a registered handler for one signaling protocol,
//! identified by a unique prefix name ("sip", "h323", ...). Endpoints are
//! attached and detached explicitly and live for the process lifetime;
//! they are never owned by a call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::call::Call;
use crate::errors::Result;

/// Options passed through to an endpoint when creating a connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Free-form protocol-specific options.
    pub string_options: HashMap<String, String>,
}

/// A registered protocol handler.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The protocol prefix this endpoint answers to. Matched
    /// case-insensitively against the text before the first `:` of a
    /// destination address.
    fn prefix_name(&self) -> &str;

    /// Create a connection on `call` toward `remote_party` and attach it.
    async fn make_connection(
        &self,
        call: &Call,
        remote_party: &str,
        options: &ConnectionOptions,
    ) -> Result<()>;

    /// Perform deferred cleanup of endpoint-owned resources.
    ///
    /// Returns `true` when everything pending has been reclaimed.
    async fn garbage_collection(&self) -> bool;
}

/// The engine's endpoint collection.
///
/// Readers-writer discipline: many concurrent lookups, exclusive
/// attach/detach.
pub struct EndpointRegistry {
    endpoints: RwLock<Vec<Arc<dyn Endpoint>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
        }
    }

    /// Attach an endpoint. Attaching the same endpoint twice is a no-op.
    pub async fn attach(&self, endpoint: Arc<dyn Endpoint>) {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|e| Arc::ptr_eq(e, &endpoint)) {
            return;
        }
        debug!("attached endpoint \"{}\"", endpoint.prefix_name());
        endpoints.push(endpoint);
    }

    /// Detach a previously attached endpoint.
    pub async fn detach(&self, endpoint: &Arc<dyn Endpoint>) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(pos) = endpoints.iter().position(|e| Arc::ptr_eq(e, endpoint)) {
            debug!("detached endpoint \"{}\"", endpoint.prefix_name());
            endpoints.remove(pos);
        }
    }

    /// Detach every endpoint.
    pub async fn detach_all(&self) {
        self.endpoints.write().await.clear();
    }

    /// Find the first endpoint whose prefix matches, case-insensitively.
    pub async fn find(&self, prefix: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints
            .read()
            .await
            .iter()
            .find(|e| e.prefix_name().eq_ignore_ascii_case(prefix))
            .cloned()
    }

    /// All endpoints whose prefix matches, in attach order.
    pub async fn matching(&self, prefix: &str) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints
            .read()
            .await
            .iter()
            .filter(|e| e.prefix_name().eq_ignore_ascii_case(prefix))
            .cloned()
            .collect()
    }

    /// Prefix of the first attached endpoint, the default protocol when a
    /// destination names none.
    pub async fn first_prefix(&self) -> Option<String> {
        self.endpoints
            .read()
            .await
            .first()
            .map(|e| e.prefix_name().to_string())
    }

    /// Snapshot of every attached endpoint, in attach order.
    pub async fn snapshot(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
