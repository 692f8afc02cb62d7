//! Per-agent state store with write-through authorization (spec.md §4.12).
//!
//! A bounded `{key -> value}` map, mutation observers, and a small
//! declarative escalation-rule engine (`{key, condition, message}`) that
//! fires a message when a write matches. Grounded on the teacher's
//! preference for small `Fn`-trait observer callbacks (`hooks.rs`'s
//! `NativeHandler`, `container.rs`'s `LifecycleObserver`) rather than a
//! heavier pub/sub abstraction.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::hub::scheduler::EventCondition;
use crate::{Error, Result};

/// Per-agent bounds (spec.md §4.12).
#[derive(Debug, Clone, Copy)]
pub struct StateLimits {
    pub max_keys: usize,
    pub max_value_size: usize,
    pub max_total_size: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            max_keys: 256,
            max_value_size: 64 * 1024,
            max_total_size: 1024 * 1024,
        }
    }
}

/// A declarative escalation rule: fires `message` whenever a write to
/// `key` satisfies `condition`. Reuses the scheduler's restricted
/// `EventCondition` grammar rather than inventing a second one.
pub struct EscalationRule {
    pub key: String,
    pub condition: EventCondition,
    pub message: String,
}

pub type MutationObserver = Arc<dyn Fn(&str, &str, &Value) + Send + Sync>;

fn value_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

struct AgentState {
    entries: HashMap<String, Value>,
    last_numeric: HashMap<String, f64>,
}

impl AgentState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            last_numeric: HashMap::new(),
        }
    }

    fn total_size(&self) -> usize {
        self.entries.values().map(value_size).sum()
    }
}

/// Owns the bounded state maps for every agent hosted by this hub, plus the
/// escalation rules and mutation observers that apply across all of them.
pub struct StateStore {
    limits: StateLimits,
    agents: HashMap<String, AgentState>,
    rules: Vec<EscalationRule>,
    observers: Vec<MutationObserver>,
}

impl StateStore {
    pub fn new(limits: StateLimits) -> Self {
        Self {
            limits,
            agents: HashMap::new(),
            rules: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn add_rule(&mut self, rule: EscalationRule) {
        self.rules.push(rule);
    }

    pub fn add_observer(&mut self, observer: MutationObserver) {
        self.observers.push(observer);
    }

    fn agent_mut(&mut self, agent_id: &str) -> &mut AgentState {
        self.agents
            .entry(agent_id.to_string())
            .or_insert_with(AgentState::new)
    }

    /// Writes `key = value` for `agent_id`, enforcing the bound checks
    /// before mutating, then runs observers and escalation rules. Returns
    /// any escalation messages that fired.
    pub fn set(&mut self, agent_id: &str, key: &str, value: Value) -> Result<Vec<String>> {
        let incoming_size = value_size(&value);
        if incoming_size > self.limits.max_value_size {
            return Err(Error::other(format!(
                "value for key {key} exceeds max_value_size ({incoming_size} > {})",
                self.limits.max_value_size
            )));
        }

        {
            let state = self.agent_mut(agent_id);
            let is_new_key = !state.entries.contains_key(key);
            if is_new_key && state.entries.len() >= self.limits.max_keys {
                return Err(Error::other(format!(
                    "agent {agent_id} already has max_keys ({}) entries",
                    self.limits.max_keys
                )));
            }
            let previous_size = state.entries.get(key).map(value_size).unwrap_or(0);
            let projected_total = state.total_size() - previous_size + incoming_size;
            if projected_total > self.limits.max_total_size {
                return Err(Error::other(format!(
                    "write to {key} would exceed max_total_size ({projected_total} > {})",
                    self.limits.max_total_size
                )));
            }
        }

        let previous_numeric = self
            .agents
            .get(agent_id)
            .and_then(|s| s.last_numeric.get(key))
            .copied();

        {
            let state = self.agent_mut(agent_id);
            state.entries.insert(key.to_string(), value.clone());
            if let Some(num) = as_f64(&value) {
                state.last_numeric.insert(key.to_string(), num);
            }
        }

        for observer in &self.observers {
            observer(agent_id, key, &value);
        }

        let mut fired = Vec::new();
        if let Some(current) = as_f64(&value) {
            for rule in &self.rules {
                if rule.key != key {
                    continue;
                }
                if rule.condition.evaluate(previous_numeric, current) {
                    fired.push(rule.message.clone());
                }
            }
        }
        Ok(fired)
    }

    pub fn get(&self, agent_id: &str, key: &str) -> Option<&Value> {
        self.agents.get(agent_id)?.entries.get(key)
    }

    pub fn delete(&mut self, agent_id: &str, key: &str) {
        if let Some(state) = self.agents.get_mut(agent_id) {
            state.entries.remove(key);
            state.last_numeric.remove(key);
        }
    }

    pub fn keys(&self, agent_id: &str) -> Vec<String> {
        self.agents
            .get(agent_id)
            .map(|s| s.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_agent(&mut self, agent_id: &str) {
        self.agents.remove(agent_id);
    }
}

/// Gate for `state_write_through`: only subscribed clients may write
/// through to a hub agent's state (spec.md §4.6/§4.12).
pub fn authorize_write_through(is_subscribed: bool) -> Result<()> {
    if is_subscribed {
        Ok(())
    } else {
        Err(Error::hub_auth(
            "client is not subscribed to this agent; write-through refused",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn set_and_get_round_trips() {
        let mut store = StateStore::new(StateLimits::default());
        store.set("agent-1", "counter", json!(1)).unwrap();
        assert_eq!(store.get("agent-1", "counter"), Some(&json!(1)));
    }

    #[test]
    fn max_keys_bound_is_enforced() {
        let mut store = StateStore::new(StateLimits {
            max_keys: 1,
            ..StateLimits::default()
        });
        store.set("agent-1", "a", json!(1)).unwrap();
        assert!(store.set("agent-1", "b", json!(2)).is_err());
        // Overwriting an existing key is fine even at the cap.
        assert!(store.set("agent-1", "a", json!(2)).is_ok());
    }

    #[test]
    fn max_value_size_bound_is_enforced() {
        let mut store = StateStore::new(StateLimits {
            max_value_size: 4,
            ..StateLimits::default()
        });
        assert!(store.set("agent-1", "a", json!("this is way too long")).is_err());
    }

    #[test]
    fn max_total_size_bound_is_enforced() {
        let mut store = StateStore::new(StateLimits {
            max_total_size: 10,
            max_value_size: 100,
            ..StateLimits::default()
        });
        store.set("agent-1", "a", json!("12345")).unwrap();
        assert!(store.set("agent-1", "b", json!("12345678")).is_err());
    }

    #[test]
    fn mutation_observer_is_invoked() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let mut store = StateStore::new(StateLimits::default());
        store.add_observer(Arc::new(move |agent_id, key, value| {
            calls_clone
                .lock()
                .unwrap()
                .push((agent_id.to_string(), key.to_string(), value.clone()));
        }));
        store.set("agent-1", "counter", json!(5)).unwrap();
        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, "counter");
    }

    #[test]
    fn escalation_rule_fires_on_threshold_breach() {
        let mut store = StateStore::new(StateLimits::default());
        store.add_rule(EscalationRule {
            key: "temperature".to_string(),
            condition: EventCondition::Gt(100.0),
            message: "overheating".to_string(),
        });
        let fired = store.set("agent-1", "temperature", json!(50)).unwrap();
        assert!(fired.is_empty());
        let fired = store.set("agent-1", "temperature", json!(150)).unwrap();
        assert_eq!(fired, vec!["overheating".to_string()]);
    }

    #[test]
    fn write_through_requires_subscription() {
        assert!(authorize_write_through(false).is_err());
        assert!(authorize_write_through(true).is_ok());
    }
}
