use serde::Deserialize;

/// Engine tuning knobs, deserializable from application config.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When set, newly created tasks get `due_at = now + this window`
    pub default_task_due_secs: Option<u64>,
    /// Attach structured payloads to approval events
    pub record_event_payloads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_task_due_secs: None,
            record_event_payloads: true,
        }
    }
}
