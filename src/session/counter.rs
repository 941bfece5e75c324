use crate::download::errors::PersistenceError;
use crate::store::{KeyValueStore, get_json, set_json};
use std::sync::Arc;

fn counter_key(marketplace: &str) -> String {
    format!("session_counter:{}", marketplace.trim().to_uppercase())
}

/// Per-marketplace session numbering, persisted so numbers keep increasing
/// across restarts
#[derive(Clone)]
pub struct SessionCounter {
    store: Arc<dyn KeyValueStore>,
}

impl SessionCounter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Last assigned number, 0 if none
    pub async fn peek(&self, marketplace: &str) -> Result<u32, PersistenceError> {
        Ok(get_json::<u32>(self.store.as_ref(), &counter_key(marketplace))
            .await?
            .unwrap_or(0))
    }

    /// Assign the next number. Called once per session start.
    pub async fn next(&self, marketplace: &str) -> Result<u32, PersistenceError> {
        let next = self.peek(marketplace).await?.saturating_add(1);
        set_json(self.store.as_ref(), &counter_key(marketplace), &next).await?;
        tracing::info!(marketplace, session = next, "Assigned session number");
        Ok(next)
    }
}
