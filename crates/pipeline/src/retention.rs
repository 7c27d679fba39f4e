//! What happens to a job's script once its artifact is stored.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptRetention {
    /// Keep the script until the retention sweep ages it out.
    #[default]
    Retain,
    /// Remove the script right after a successful upload.
    DeleteAfterUpload,
}

impl ScriptRetention {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "retain" => Some(Self::Retain),
            "delete_after_upload" => Some(Self::DeleteAfterUpload),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Retain => "retain",
            Self::DeleteAfterUpload => "delete_after_upload",
        }
    }
}

impl fmt::Display for ScriptRetention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_names() {
        assert_eq!(ScriptRetention::from_name("retain"), Some(ScriptRetention::Retain));
        assert_eq!(
            ScriptRetention::from_name(" Delete_After_Upload "),
            Some(ScriptRetention::DeleteAfterUpload)
        );
        assert_eq!(ScriptRetention::from_name("forever"), None);
        assert_eq!(ScriptRetention::default(), ScriptRetention::Retain);
    }
}
