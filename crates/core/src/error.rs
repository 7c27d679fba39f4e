use serde::{Deserialize, Serialize};

/// Failure of a single render attempt.
///
/// The `Display` output starts with the taxonomy name so that the message
/// stored on a failed job identifies its cause on its own.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("TemplateBindingError: template '{template}' could not be bound: {reason}")]
    TemplateBinding { template: String, reason: String },

    #[error("RenderTimeoutError: engine exceeded the {timeout_secs}s wall-clock budget")]
    RenderTimeout { timeout_secs: u64 },

    #[error("RenderProcessError: engine exited with code {exit_code:?}: {stderr}")]
    RenderProcess {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ArtifactNotFoundError: no mp4/mov containing '{scene_name}' under {dir}")]
    ArtifactNotFound { scene_name: String, dir: String },

    #[error("StorageError: {0}")]
    Storage(String),

    #[error("WorkerLostError: {0}")]
    WorkerLost(String),
}

impl RenderError {
    /// Build a binding error listing the placeholders the context lacked.
    pub fn missing_placeholders(template: &str, missing: &[String]) -> Self {
        Self::TemplateBinding {
            template: template.to_string(),
            reason: format!("missing values for {}", missing.join(", ")),
        }
    }

    /// Only binding failures are permanent; everything else is retried by
    /// the queue until the attempt bound is reached.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TemplateBinding { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TemplateBinding { .. } => ErrorKind::TemplateBinding,
            Self::RenderTimeout { .. } => ErrorKind::RenderTimeout,
            Self::RenderProcess { .. } => ErrorKind::RenderProcess,
            Self::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            Self::Storage(_) => ErrorKind::Storage,
            Self::WorkerLost(_) => ErrorKind::WorkerLost,
        }
    }
}

/// Serializable discriminant of [`RenderError`], persisted on the job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TemplateBinding,
    RenderTimeout,
    RenderProcess,
    ArtifactNotFound,
    Storage,
    WorkerLost,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemplateBinding => "template_binding",
            Self::RenderTimeout => "render_timeout",
            Self::RenderProcess => "render_process",
            Self::ArtifactNotFound => "artifact_not_found",
            Self::Storage => "storage",
            Self::WorkerLost => "worker_lost",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "template_binding" => Some(Self::TemplateBinding),
            "render_timeout" => Some(Self::RenderTimeout),
            "render_process" => Some(Self::RenderProcess),
            "artifact_not_found" => Some(Self::ArtifactNotFound),
            "storage" => Some(Self::Storage),
            "worker_lost" => Some(Self::WorkerLost),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_template_binding_is_permanent() {
        let binding = RenderError::missing_placeholders("graph", &["graph_expression".into()]);
        assert!(!binding.is_retryable());

        let retryable = [
            RenderError::RenderTimeout { timeout_secs: 1 },
            RenderError::RenderProcess {
                exit_code: Some(1),
                stderr: String::new(),
            },
            RenderError::ArtifactNotFound {
                scene_name: "GraphScene".into(),
                dir: "/tmp".into(),
            },
            RenderError::Storage("bucket gone".into()),
            RenderError::WorkerLost("heartbeat".into()),
        ];
        for err in &retryable {
            assert!(err.is_retryable(), "{err} should be retryable");
        }
    }

    #[test]
    fn display_starts_with_taxonomy_name() {
        let err = RenderError::RenderProcess {
            exit_code: Some(2),
            stderr: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "RenderProcessError: engine exited with code Some(2): boom"
        );
        assert!(RenderError::RenderTimeout { timeout_secs: 1 }
            .to_string()
            .starts_with("RenderTimeoutError"));
    }

    #[test]
    fn missing_placeholders_lists_names() {
        let err = RenderError::missing_placeholders(
            "graph",
            &["graph_expression".into(), "graph_x_range".into()],
        );
        let msg = err.to_string();
        assert!(msg.contains("graph_expression, graph_x_range"));
        assert_eq!(err.kind(), ErrorKind::TemplateBinding);
    }

    #[test]
    fn error_kind_names_round_trip() {
        for kind in [
            ErrorKind::TemplateBinding,
            ErrorKind::RenderTimeout,
            ErrorKind::RenderProcess,
            ErrorKind::ArtifactNotFound,
            ErrorKind::Storage,
            ErrorKind::WorkerLost,
        ] {
            assert_eq!(ErrorKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_name("nope"), None);
    }
}
