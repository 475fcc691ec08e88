// Lifecycle events
//
// The only externally observable signals of wizard progress. Delivery is
// synchronous and in registration order, before the emitting lifecycle method
// returns; a failing listener is logged and never aborts the transition.

use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum InstallEvent {
    #[serde(rename_all = "camelCase")]
    InstallationStarted { run_id: String, config: Value },
    #[serde(rename_all = "camelCase")]
    StepStarted { step_id: String, data: Value },
    #[serde(rename_all = "camelCase")]
    StepCompleted { step_id: String, data: Value },
    #[serde(rename_all = "camelCase")]
    StepFailed {
        step_id: String,
        error: String,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    InstallationCompleted {
        run_id: String,
        completed_steps: Vec<String>,
        duration_seconds: f64,
    },
}

impl InstallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InstallEvent::InstallationStarted { .. } => "installation_started",
            InstallEvent::StepStarted { .. } => "step_started",
            InstallEvent::StepCompleted { .. } => "step_completed",
            InstallEvent::StepFailed { .. } => "step_failed",
            InstallEvent::InstallationCompleted { .. } => "installation_completed",
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &InstallEvent) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }

    /// Deliver to every listener in registration order. Listener errors are
    /// logged and swallowed; progress reporting must never break the wizard.
    pub fn emit(&self, event: &InstallEvent) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_event(event) {
                warn!(
                    "[PHASE: events] [STEP: {}] Listener failed: {}",
                    event.name(),
                    e
                );
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: &InstallEvent) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.name().to_string());
            Ok(())
        }
    }

    struct Exploder;

    impl EventListener for Exploder {
        fn on_event(&self, _event: &InstallEvent) -> anyhow::Result<()> {
            anyhow::bail!("listener down")
        }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });

        let mut bus = EventBus::new();
        bus.subscribe(recorder.clone());

        bus.emit(&InstallEvent::StepStarted {
            step_id: "welcome".to_string(),
            data: json!({}),
        });
        bus.emit(&InstallEvent::StepCompleted {
            step_id: "welcome".to_string(),
            data: json!({}),
        });

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["step_started", "step_completed"]
        );
    }

    #[test]
    fn test_failing_listener_does_not_block_later_listeners() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });

        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(Exploder));
        bus.subscribe(recorder.clone());

        bus.emit(&InstallEvent::InstallationCompleted {
            run_id: "run-1".to_string(),
            completed_steps: vec![],
            duration_seconds: 0.5,
        });

        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = InstallEvent::StepFailed {
            step_id: "account".to_string(),
            error: "validation failed".to_string(),
            data: json!({}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"stepFailed\""));
        assert!(json.contains("\"stepId\":\"account\""));
    }
}
