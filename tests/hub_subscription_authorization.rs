//! Integration test for spec.md §7/§8 scenario 6: a `state_write_through`
//! message only takes effect once the sending client has subscribed to the
//! owning hub agent. Exercises `ShellRelay` (subscription bookkeeping) and
//! `hub::state_store` (the authorization gate plus the bounded mutation
//! store) together, the way `src/bin/hub.rs`'s websocket handler would.

use open_agent_runtime::ShellRelay;
use open_agent_runtime::hub::StateStore;
use open_agent_runtime::hub::state_store::{StateLimits, authorize_write_through};
use serde_json::json;

#[tokio::test]
async fn write_through_is_ignored_until_the_client_subscribes() {
    let relay = ShellRelay::new();
    let mut store = StateStore::new(StateLimits::default());

    let client_id = "client-1";
    let hub_agent_id = "hub-agent-1";

    // Before subscribing: the gate refuses, and the caller must not apply
    // the write at all (spec.md §7, "silently ignored" means no mutation,
    // not a mutation the client never finds out about).
    assert!(!relay.is_subscribed(client_id, hub_agent_id).await);
    let is_subscribed = relay.is_subscribed(client_id, hub_agent_id).await;
    assert!(authorize_write_through(is_subscribed).is_err());
    assert!(store.get(hub_agent_id, "k").is_none());

    // After subscribing, the same write_through succeeds and is visible.
    relay.subscribe(client_id, hub_agent_id).await;
    let is_subscribed = relay.is_subscribed(client_id, hub_agent_id).await;
    assert!(authorize_write_through(is_subscribed).is_ok());
    store.set(hub_agent_id, "k", json!(1)).unwrap();
    assert_eq!(store.get(hub_agent_id, "k"), Some(&json!(1)));

    // Unsubscribing revokes the permission again, though the previously
    // written value is untouched.
    relay.unsubscribe(client_id, hub_agent_id).await;
    let is_subscribed = relay.is_subscribed(client_id, hub_agent_id).await;
    assert!(authorize_write_through(is_subscribed).is_err());
    assert_eq!(store.get(hub_agent_id, "k"), Some(&json!(1)));
}
