use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Último error observado por la saga, con el paso donde ocurrió.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SagaError {
    pub message: String,
    pub step: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot del estado de la saga, persistido como JSON en la fila de la
/// transacción después de cada transición. El esquema es estricto para que la
/// recuperación tras un crash sea determinista a partir del store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SagaState {
    pub current_step: i32,
    pub completed_steps: Vec<String>,
    pub compensated_steps: Vec<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SagaError>,
}

impl SagaState {
    pub fn record_completed(&mut self, step: &str) {
        self.completed_steps.push(step.to_string());
        self.current_step = self.completed_steps.len() as i32;
    }

    pub fn record_compensated(&mut self, step: &str) {
        self.compensated_steps.push(step.to_string());
    }

    pub fn record_error(&mut self, step: &str, message: String, at: DateTime<Utc>) {
        self.last_error = Some(SagaError {
            message,
            step: step.to_string(),
            timestamp: at,
        });
    }

    /// Pasos completados que aún no fueron compensados, en orden inverso de
    /// ejecución (el orden en que deben compensarse).
    pub fn pending_compensations(&self) -> Vec<String> {
        self.completed_steps
            .iter()
            .rev()
            .filter(|s| !self.compensated_steps.contains(s))
            .cloned()
            .collect()
    }
}
