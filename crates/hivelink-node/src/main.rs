//! Hivelink node binary
//!
//! Reads `HIVELINK_*` variables, seeds an in-memory key/value store and
//! runs until interrupted.

use std::sync::Arc;

use hivelink_link::{MemoryStore, Value};
use hivelink_node::{Node, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hivelink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?;

    let store = MemoryStore::new();
    for spec in &config.keys {
        let meta = spec.meta();
        store.define(spec.key, Value::new(meta.ty, meta.count, vec![0; meta.byte_len()])?);
    }
    tracing::info!(keys = store.len(), "Seeded key/value store");

    let node = Node::new(config, Arc::new(store)).await?;
    let handle = node.spawn()?;

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;

    Ok(())
}
