//! Job state enum persisted as lowercase text.

use serde::{Deserialize, Serialize};

macro_rules! define_state_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Database / wire name.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $val ),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_state_enum! {
    /// Render job lifecycle state.
    JobState {
        Queued = "queued",
        Running = "running",
        /// Backing off after a recoverable failure.
        Retrying = "retrying",
        Succeeded = "succeeded",
        Failed = "failed",
        Cancelled = "cancelled",
    }
}

/// States that end a job's life.
pub const TERMINAL_STATES: [JobState; 3] =
    [JobState::Succeeded, JobState::Failed, JobState::Cancelled];

/// States whose files the retention sweep must not touch.
pub const ACTIVE_STATES: [JobState; 3] = [JobState::Queued, JobState::Running, JobState::Retrying];

impl JobState {
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATES.contains(&self)
    }

    pub fn is_active(self) -> bool {
        ACTIVE_STATES.contains(&self)
    }
}
