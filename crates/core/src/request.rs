//! Render request payload submitted by the course/lesson layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Category of educational animation; selects the script template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    Graph,
    Proof,
    Algebra,
    Geometry,
    Generic,
}

impl SceneType {
    pub const ALL: [SceneType; 5] = [
        Self::Graph,
        Self::Proof,
        Self::Algebra,
        Self::Geometry,
        Self::Generic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Graph => "graph",
            Self::Proof => "proof",
            Self::Algebra => "algebra",
            Self::Geometry => "geometry",
            Self::Generic => "generic",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for SceneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output quality tier, mapped to an engine quality flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "4k")]
    UltraHd,
}

impl QualityTier {
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::UltraHd => "4k",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "4k" => Some(Self::UltraHd),
            _ => None,
        }
    }

    /// Command-line flag understood by the render engine.
    pub fn engine_flag(self) -> &'static str {
        match self {
            Self::Low => "-ql",
            Self::Medium => "-qm",
            Self::High => "-qh",
            Self::UltraHd => "-qk",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Four required colors, each a `#RGB` or `#RRGGBB` hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    pub primary: String,
    pub secondary: String,
    pub text: String,
    pub background: String,
}

impl ColorPalette {
    /// Named entries in binding order.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("primary", &self.primary),
            ("secondary", &self.secondary),
            ("text", &self.text),
            ("background", &self.background),
        ]
    }
}

/// Function plot parameters for `graph` scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub expression: String,
    pub x_range: [f64; 2],
    #[serde(default)]
    pub y_range: Option<[f64; 2]>,
}

/// A shape to draw; parameters are passed through to the template verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeSpec {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub scene_type: SceneType,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub equations: Vec<String>,
    #[serde(default)]
    pub graph: Option<GraphSpec>,
    #[serde(default)]
    pub shapes: Vec<ShapeSpec>,
    #[serde(default)]
    pub proof_steps: Vec<String>,
    pub palette: ColorPalette,
    pub level: String,
    /// Falls back to the worker's configured default when absent.
    #[serde(default)]
    pub quality: Option<QualityTier>,
    #[serde(default)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

impl RenderRequest {
    /// Minimal request with a default palette; used by callers that build
    /// requests programmatically.
    pub fn new(scene_type: SceneType, title: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            scene_type,
            title: title.into(),
            subtitle: None,
            equations: Vec::new(),
            graph: None,
            shapes: Vec::new(),
            proof_steps: Vec::new(),
            palette: ColorPalette {
                primary: "#58C4DD".into(),
                secondary: "#FC6255".into(),
                text: "#FFFFFF".into(),
                background: "#1E1E1E".into(),
            },
            level: level.into(),
            quality: None,
            extensions: serde_json::Map::new(),
        }
    }

    /// Check the fields every template depends on.
    pub fn validate(&self) -> Result<(), RenderError> {
        let template = self.scene_type.name();
        if self.title.trim().is_empty() {
            return Err(RenderError::TemplateBinding {
                template: template.into(),
                reason: "title must not be empty".into(),
            });
        }
        if self.level.trim().is_empty() {
            return Err(RenderError::TemplateBinding {
                template: template.into(),
                reason: "level must not be empty".into(),
            });
        }
        for (name, value) in self.palette.entries() {
            if !is_hex_color(value) {
                return Err(RenderError::TemplateBinding {
                    template: template.into(),
                    reason: format!("palette color '{name}' is not a hex color: {value:?}"),
                });
            }
        }
        if let Some(graph) = &self.graph {
            let ranges = std::iter::once(graph.x_range).chain(graph.y_range);
            if ranges.flatten().any(|bound| !bound.is_finite()) {
                return Err(RenderError::TemplateBinding {
                    template: template.into(),
                    reason: "graph ranges must be finite".into(),
                });
            }
            if graph.x_range[0] >= graph.x_range[1] {
                return Err(RenderError::TemplateBinding {
                    template: template.into(),
                    reason: "graph x_range must be increasing".into(),
                });
            }
        }
        Ok(())
    }
}

/// `#RGB` or `#RRGGBB`.
pub fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_type_serializes_snake_case() {
        let json = serde_json::to_string(&SceneType::Geometry).expect("serialize");
        assert_eq!(json, "\"geometry\"");
        assert_eq!(SceneType::from_name("proof"), Some(SceneType::Proof));
        assert_eq!(SceneType::from_name("Proof"), None);
    }

    #[test]
    fn quality_4k_uses_literal_name() {
        let q: QualityTier = serde_json::from_str("\"4k\"").expect("deserialize");
        assert_eq!(q, QualityTier::UltraHd);
        assert_eq!(q.engine_flag(), "-qk");
        assert_eq!(QualityTier::from_name(" LOW "), Some(QualityTier::Low));
    }

    #[test]
    fn hex_color_validation() {
        assert!(is_hex_color("#fff"));
        assert!(is_hex_color("#1E1E1E"));
        assert!(!is_hex_color("1E1E1E"));
        assert!(!is_hex_color("#12345"));
        assert!(!is_hex_color("#GGGGGG"));
    }

    #[test]
    fn deserializes_minimal_payload() {
        let payload = serde_json::json!({
            "scene_type": "graph",
            "title": "Lines",
            "equations": ["y=2x+1"],
            "graph": { "expression": "2*x+1", "x_range": [-5.0, 5.0] },
            "palette": {
                "primary": "#58C4DD",
                "secondary": "#FC6255",
                "text": "#FFFFFF",
                "background": "#000"
            },
            "level": "middle_school",
            "quality": "low"
        });
        let req: RenderRequest = serde_json::from_value(payload).expect("deserialize");
        assert_eq!(req.scene_type, SceneType::Graph);
        assert_eq!(req.quality, Some(QualityTier::Low));
        assert!(req.graph.as_ref().is_some_and(|g| g.y_range.is_none()));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn invalid_palette_fails_validation() {
        let mut req = RenderRequest::new(SceneType::Generic, "Intro", "college");
        req.palette.text = "white".into();
        let err = req.validate().expect_err("palette should be rejected");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("'text'"));
    }

    #[test]
    fn graph_ranges_must_be_finite_and_increasing() {
        let mut req = RenderRequest::new(SceneType::Graph, "Plot", "college");
        req.graph = Some(GraphSpec {
            expression: "x".into(),
            x_range: [1.0, -1.0],
            y_range: None,
        });
        assert!(req.validate().is_err());

        req.graph = Some(GraphSpec {
            expression: "x".into(),
            x_range: [-1.0, 1.0],
            y_range: Some([f64::NEG_INFINITY, 1.0]),
        });
        let err = req.validate().expect_err("infinite range");
        assert!(err.to_string().contains("finite"));
    }
}
