//! Script generation: render request → runnable scene program.
//!
//! [`ScriptGenerator::render`] is pure and deterministic: the same request,
//! job id and quality always produce byte-identical text. Per-job file names
//! keep concurrent workers from ever writing the same script.

pub mod literal;
pub mod notation;
pub mod template;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::RenderError;
use crate::naming::{scene_class_name, script_file_name, short_job_id};
use crate::request::{QualityTier, RenderRequest};
use crate::types::JobId;

use literal::{py_range, py_scalar, py_str, py_str_list};
use notation::{plotted_side, to_python_expression, LatexNotation, NotationTransform};
use template::TemplateSet;

/// X range used when the plotted expression comes from an equation.
pub const DEFAULT_X_RANGE: [f64; 2] = [-10.0, 10.0];

/// Prefix of extension placeholders: extension `speed` binds `ext_speed`.
const EXTENSION_PREFIX: &str = "ext_";

/// Rendered script text before it is written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
    pub scene_name: String,
}

/// A script written under the scripts root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    pub text: String,
    pub scene_name: String,
    pub path: PathBuf,
}

/// Failure to produce a script file.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Binding(#[from] RenderError),

    #[error("failed to write script {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScriptError {
    /// Collapse into the render taxonomy; write failures become retryable
    /// process errors.
    pub fn into_render_error(self) -> RenderError {
        match self {
            Self::Binding(e) => e,
            Self::Write { path, source } => RenderError::RenderProcess {
                exit_code: None,
                stderr: format!("could not write script {}: {source}", path.display()),
            },
        }
    }
}

pub struct ScriptGenerator {
    templates: TemplateSet,
    notation: Arc<dyn NotationTransform>,
    scripts_root: PathBuf,
}

impl std::fmt::Debug for ScriptGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptGenerator")
            .field("templates", &self.templates)
            .field("scripts_root", &self.scripts_root)
            .finish_non_exhaustive()
    }
}

impl ScriptGenerator {
    /// Generator with LaTeX notation.
    pub fn new(templates: TemplateSet, scripts_root: impl Into<PathBuf>) -> Self {
        Self::with_notation(templates, Arc::new(LatexNotation), scripts_root)
    }

    pub fn with_notation(
        templates: TemplateSet,
        notation: Arc<dyn NotationTransform>,
        scripts_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            templates,
            notation,
            scripts_root: scripts_root.into(),
        }
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// Path the script for `job_id` is (or will be) written to.
    pub fn script_path(&self, job_id: &JobId) -> PathBuf {
        self.scripts_root.join(script_file_name(job_id))
    }

    /// Bind the request into its scene template.
    pub fn render(
        &self,
        request: &RenderRequest,
        job_id: &JobId,
        quality: QualityTier,
    ) -> Result<GeneratedText, RenderError> {
        request.validate()?;
        let template = self.templates.resolve(request.scene_type);
        let scene_name = scene_class_name(&request.level, request.scene_type);
        let context = self.bind(request, job_id, quality, &scene_name);
        let text = template.render(&context)?;
        Ok(GeneratedText { text, scene_name })
    }

    /// Render and write `scripts_root/job_<uuid>.py`.
    pub async fn generate(
        &self,
        request: &RenderRequest,
        job_id: &JobId,
        quality: QualityTier,
    ) -> Result<GeneratedScript, ScriptError> {
        let GeneratedText { text, scene_name } = self.render(request, job_id, quality)?;
        let path = self.script_path(job_id);
        let write = async {
            tokio::fs::create_dir_all(&self.scripts_root).await?;
            tokio::fs::write(&path, text.as_bytes()).await
        };
        if let Err(source) = write.await {
            return Err(ScriptError::Write { path, source });
        }
        tracing::debug!(
            job_id = %job_id,
            scene_name = %scene_name,
            path = %path.display(),
            "Script generated",
        );
        Ok(GeneratedScript {
            text,
            scene_name,
            path,
        })
    }

    /// Placeholder values for `request`. Only fields that carry data are
    /// bound, so a template that needs an absent field fails with the
    /// placeholder named.
    fn bind(
        &self,
        request: &RenderRequest,
        job_id: &JobId,
        quality: QualityTier,
        scene_name: &str,
    ) -> BTreeMap<String, String> {
        let mut ctx = BTreeMap::new();
        ctx.insert("scene_name".to_string(), scene_name.to_string());
        ctx.insert("job_id".to_string(), py_str(&short_job_id(job_id)));
        ctx.insert("title".to_string(), py_str(&request.title));
        ctx.insert(
            "subtitle".to_string(),
            py_str(request.subtitle.as_deref().unwrap_or_default()),
        );
        ctx.insert("level".to_string(), py_str(&request.level));
        ctx.insert("quality".to_string(), py_str(quality.name()));
        for (name, value) in request.palette.entries() {
            ctx.insert(format!("color_{name}"), py_str(value));
        }

        let shapes_json = serde_json::to_string(&request.shapes).unwrap_or_else(|_| "[]".into());
        ctx.insert("shapes_json".to_string(), py_str(&shapes_json));
        if !request.shapes.is_empty() {
            ctx.insert("shapes".to_string(), py_str(&shapes_json));
        }

        if !request.equations.is_empty() {
            let equations: Vec<String> = request
                .equations
                .iter()
                .map(|e| self.notation.transform(e))
                .collect();
            ctx.insert("equations".to_string(), py_str_list(&equations));
        }
        if !request.proof_steps.is_empty() {
            let steps: Vec<String> = request
                .proof_steps
                .iter()
                .map(|s| self.notation.transform(s))
                .collect();
            ctx.insert("proof_steps".to_string(), py_str_list(&steps));
        }

        let plot = match &request.graph {
            Some(graph) => Some((graph.expression.as_str(), graph.x_range, graph.y_range)),
            None => request
                .equations
                .iter()
                .find_map(|e| plotted_side(e))
                .map(|rhs| (rhs, DEFAULT_X_RANGE, None)),
        };
        if let Some((expression, x_range, y_range)) = plot {
            ctx.insert(
                "graph_expression".to_string(),
                py_str(&to_python_expression(expression)),
            );
            ctx.insert("graph_x_range".to_string(), py_range(x_range));
            ctx.insert(
                "graph_y_range".to_string(),
                y_range.map(py_range).unwrap_or_else(|| "None".to_string()),
            );
        }

        for (key, value) in &request.extensions {
            if !is_placeholder_key(key) {
                continue;
            }
            if let Some(literal) = py_scalar(value) {
                ctx.insert(format!("{EXTENSION_PREFIX}{key}"), literal);
            }
        }
        ctx
    }
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::notation::IdentityNotation;
    use super::template::Template;
    use super::*;
    use crate::request::{GraphSpec, SceneType};

    fn generator(root: &Path) -> ScriptGenerator {
        ScriptGenerator::new(TemplateSet::builtin(), root)
    }

    fn graph_request() -> RenderRequest {
        let mut req = RenderRequest::new(SceneType::Graph, "Lines", "middle_school");
        req.equations = vec!["y=2x+1".into()];
        req
    }

    fn job_id() -> JobId {
        JobId::parse_str("3f2b8c1e-0000-4000-8000-000000000000").expect("uuid")
    }

    #[test]
    fn graph_expression_is_derived_from_equation() {
        let generator = generator(Path::new("/tmp/unused"));
        let out = generator
            .render(&graph_request(), &job_id(), QualityTier::Low)
            .expect("render");
        assert_eq!(out.scene_name, "MiddleSchoolGraphScene");
        assert!(out.text.contains("class MiddleSchoolGraphScene(Scene):"));
        assert!(out.text.contains(r#"EXPRESSION = "2*x+1""#));
        assert!(out.text.contains("X_RANGE = [-10.0, 10.0]"));
        assert!(out.text.contains("Y_RANGE = None"));
        assert!(out.text.contains(r#"QUALITY = "low""#));
        assert!(out.text.contains(r#"JOB_ID = "3f2b8c1e""#));
    }

    #[test]
    fn explicit_graph_spec_wins_over_equations() {
        let mut req = graph_request();
        req.graph = Some(GraphSpec {
            expression: "x^2".into(),
            x_range: [-3.0, 3.0],
            y_range: Some([0.0, 9.0]),
        });
        let out = generator(Path::new("/tmp/unused"))
            .render(&req, &job_id(), QualityTier::High)
            .expect("render");
        assert!(out.text.contains(r#"EXPRESSION = "x**2""#));
        assert!(out.text.contains("X_RANGE = [-3.0, 3.0]"));
        assert!(out.text.contains("Y_RANGE = [0.0, 9.0]"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let generator = generator(Path::new("/tmp/unused"));
        let mut req = graph_request();
        req.subtitle = Some("slope \"m\"".into());
        req.extensions
            .insert("speed".into(), serde_json::json!(1.5));
        let a = generator.render(&req, &job_id(), QualityTier::Low).expect("a");
        let b = generator.render(&req, &job_id(), QualityTier::Low).expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn missing_required_field_is_a_binding_error() {
        // A graph scene with neither a graph spec nor a plottable equation.
        let mut req = RenderRequest::new(SceneType::Graph, "Lines", "college");
        req.equations = vec!["a^2 + b^2 = c^2".into()];
        let err = generator(Path::new("/tmp/unused"))
            .render(&req, &job_id(), QualityTier::Low)
            .expect_err("unbound graph fields");
        assert_matches!(err, RenderError::TemplateBinding { ref template, ref reason }
            if template == "graph" && reason.contains("graph_expression"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn proof_requires_steps_and_applies_notation() {
        let generator = generator(Path::new("/tmp/unused"));
        let mut req = RenderRequest::new(SceneType::Proof, "Irrational", "college");
        assert!(generator.render(&req, &job_id(), QualityTier::Low).is_err());

        req.proof_steps = vec!["sqrt(2) = p/q".into(), "p^2 = 2q^2".into()];
        let out = generator
            .render(&req, &job_id(), QualityTier::Low)
            .expect("render");
        assert!(out.text.contains(r#"STEPS = ["\\sqrt{2} = p/q", "p^{2} = 2q^{2}"]"#));
    }

    #[test]
    fn identity_notation_binds_equations_verbatim() {
        let generator = ScriptGenerator::with_notation(
            TemplateSet::builtin(),
            Arc::new(IdentityNotation),
            "/tmp/unused",
        );
        let mut req = RenderRequest::new(SceneType::Algebra, "Solve", "high_school");
        req.equations = vec!["2x + 3 = 7".into(), "x = 2".into()];
        let out = generator
            .render(&req, &job_id(), QualityTier::Medium)
            .expect("render");
        assert!(out.text.contains(r#"EQUATIONS = ["2x + 3 = 7", "x = 2"]"#));
    }

    #[test]
    fn extensions_bind_scalar_values_only() {
        let mut set = TemplateSet::builtin();
        set.insert(
            SceneType::Geometry,
            Template::new("geometry", "{{ ext_sides }} {{ ext_label }}"),
        );
        let generator = ScriptGenerator::new(set, "/tmp/unused");
        let mut req = RenderRequest::new(SceneType::Geometry, "Shapes", "elementary");
        req.extensions.insert("sides".into(), serde_json::json!(6));
        req.extensions.insert("label".into(), serde_json::json!("hex"));
        req.extensions.insert("Bad-Key".into(), serde_json::json!(1));
        req.extensions.insert("points".into(), serde_json::json!([1, 2]));
        let out = generator
            .render(&req, &job_id(), QualityTier::Low)
            .expect("render");
        assert_eq!(out.text, r#"6 "hex""#);
    }

    #[test]
    fn invalid_palette_is_rejected_before_binding() {
        let mut req = graph_request();
        req.palette.background = "#12".into();
        let err = generator(Path::new("/tmp/unused"))
            .render(&req, &job_id(), QualityTier::Low)
            .expect_err("bad palette");
        assert_eq!(err.kind(), crate::error::ErrorKind::TemplateBinding);
    }

    #[tokio::test]
    async fn generate_writes_job_scoped_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("scripts");
        let generator = generator(&root);
        let id = job_id();
        let script = generator
            .generate(&graph_request(), &id, QualityTier::Low)
            .await
            .expect("generate");
        assert_eq!(script.path, root.join("job_3f2b8c1e000040008000000000000000.py"));
        let on_disk = tokio::fs::read_to_string(&script.path).await.expect("read");
        assert_eq!(on_disk, script.text);
    }
}
