use serde::{Deserialize, Serialize};

use crate::error::GenerateError;
use crate::task::TaskHandle;

/// The uniform result handed back to the invoking surface. Every failure
/// mode of the pipeline collapses into the `Error` arm; the task handle is
/// absent only when the failure happened before submission returned one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationOutcome {
    Success {
        task_id: TaskHandle,
        image_url: String,
    },
    Error {
        task_id: Option<TaskHandle>,
        error: String,
    },
}

impl GenerationOutcome {
    pub fn failure(task_id: Option<TaskHandle>, err: &GenerateError) -> Self {
        Self::Error {
            task_id,
            error: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn task_id(&self) -> Option<&TaskHandle> {
        match self {
            Self::Success { task_id, .. } => Some(task_id),
            Self::Error { task_id, .. } => task_id.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GenerationOutcome;
    use crate::task::TaskHandle;

    #[test]
    fn serializes_to_the_invocation_surface_shape() -> anyhow::Result<()> {
        let success = GenerationOutcome::Success {
            task_id: TaskHandle::new("task-1"),
            image_url: "https://cdn.example.com/out.png".to_string(),
        };
        let value = serde_json::to_value(&success)?;
        assert_eq!(value["status"], "success");
        assert_eq!(value["task_id"], "task-1");
        assert_eq!(value["image_url"], "https://cdn.example.com/out.png");

        let failure = GenerationOutcome::Error {
            task_id: None,
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&failure)?;
        assert_eq!(value["status"], "error");
        assert!(value["task_id"].is_null());
        assert_eq!(value["error"], "boom");
        Ok(())
    }
}
