//! Scene-program templates and the scene-type lookup table.
//!
//! Templates are plain text with `{{ name }}` placeholders. Every placeholder
//! must be bound when rendering; an unbound placeholder is a
//! [`RenderError::TemplateBinding`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::RenderError;
use crate::request::SceneType;

/// Regex pattern matching `{{ placeholder }}` tokens.
pub const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([a-z_][a-z0-9_]*)\s*\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// File extension of template overrides on disk.
pub const TEMPLATE_EXTENSION: &str = "py.tmpl";

const GENERIC_TEMPLATE: &str = include_str!("../../templates/generic.py.tmpl");
const GRAPH_TEMPLATE: &str = include_str!("../../templates/graph.py.tmpl");
const PROOF_TEMPLATE: &str = include_str!("../../templates/proof.py.tmpl");
const ALGEBRA_TEMPLATE: &str = include_str!("../../templates/algebra.py.tmpl");

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A parsed template: source text plus its sorted, de-duplicated placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    placeholders: Vec<String>,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let mut placeholders: Vec<String> = PLACEHOLDER_RE
            .captures_iter(&source)
            .map(|c| c[1].to_string())
            .collect();
        placeholders.sort();
        placeholders.dedup();
        Self {
            name: name.into(),
            source,
            placeholders,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitute every placeholder from `context`.
    ///
    /// Substitution is single-pass: bound values are never re-scanned, so a
    /// value containing `{{ … }}` is emitted verbatim.
    pub fn render(&self, context: &BTreeMap<String, String>) -> Result<String, RenderError> {
        let missing: Vec<String> = self
            .placeholders
            .iter()
            .filter(|p| !context.contains_key(p.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RenderError::missing_placeholders(&self.name, &missing));
        }

        let rendered = PLACEHOLDER_RE.replace_all(&self.source, |caps: &Captures<'_>| {
            context.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

// ---------------------------------------------------------------------------
// TemplateSet
// ---------------------------------------------------------------------------

/// Explicit scene-type → template table with a mandatory generic fallback.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<SceneType, Template>,
    fallback: Template,
}

impl TemplateSet {
    /// Templates compiled into the binary. `geometry` has no specialized
    /// template and resolves to the generic fallback.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        templates.insert(SceneType::Graph, Template::new("graph", GRAPH_TEMPLATE));
        templates.insert(SceneType::Proof, Template::new("proof", PROOF_TEMPLATE));
        templates.insert(SceneType::Algebra, Template::new("algebra", ALGEBRA_TEMPLATE));
        Self {
            templates,
            fallback: Template::new("generic", GENERIC_TEMPLATE),
        }
    }

    /// Builtins, replaced by any `<scene_type>.py.tmpl` found in `dir`.
    ///
    /// Loaded once at startup; lookups never touch the filesystem.
    pub fn with_overrides(dir: &Path) -> std::io::Result<Self> {
        let mut set = Self::builtin();
        for scene_type in SceneType::ALL {
            let path = dir.join(format!("{}.{TEMPLATE_EXTENSION}", scene_type.name()));
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            tracing::info!(scene_type = %scene_type, path = %path.display(), "Loaded template override");
            set.insert(scene_type, Template::new(scene_type.name(), source));
        }
        Ok(set)
    }

    /// Register a template; `Generic` replaces the fallback.
    pub fn insert(&mut self, scene_type: SceneType, template: Template) {
        if scene_type == SceneType::Generic {
            self.fallback = template;
        } else {
            self.templates.insert(scene_type, template);
        }
    }

    /// Template for `scene_type`, or the generic fallback.
    pub fn resolve(&self, scene_type: SceneType) -> &Template {
        self.templates.get(&scene_type).unwrap_or(&self.fallback)
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn placeholders_are_sorted_and_deduplicated() {
        let t = Template::new("t", "{{ b }} {{a}} {{  b  }}");
        assert_eq!(t.placeholders(), ["a", "b"]);
    }

    #[test]
    fn render_substitutes_all_occurrences() {
        let t = Template::new("t", "class {{name}}: x = {{ value }}; y = {{value}}");
        let out = t
            .render(&ctx(&[("name", "A"), ("value", "1")]))
            .expect("render");
        assert_eq!(out, "class A: x = 1; y = 1");
    }

    #[test]
    fn render_reports_missing_placeholders() {
        let t = Template::new("graph", "{{ graph_expression }} {{ title }}");
        let err = t.render(&ctx(&[("title", "x")])).expect_err("missing");
        assert_matches!(err, RenderError::TemplateBinding { ref template, ref reason }
            if template == "graph" && reason.contains("graph_expression"));
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let t = Template::new("t", "{{a}}");
        let out = t.render(&ctx(&[("a", "{{b}}")])).expect("render");
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn geometry_falls_back_to_generic() {
        let set = TemplateSet::builtin();
        assert_eq!(set.resolve(SceneType::Geometry).name(), "generic");
        assert_eq!(set.resolve(SceneType::Graph).name(), "graph");
        assert_eq!(set.resolve(SceneType::Generic).name(), "generic");
    }

    #[test]
    fn builtin_graph_template_requires_graph_fields() {
        let set = TemplateSet::builtin();
        let graph = set.resolve(SceneType::Graph);
        assert!(graph.placeholders().iter().any(|p| p == "graph_expression"));
        assert!(graph.placeholders().iter().any(|p| p == "scene_name"));
    }

    #[test]
    fn overrides_replace_builtins() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("geometry.py.tmpl"), "# {{ title }}").expect("write");
        let set = TemplateSet::with_overrides(dir.path()).expect("load");
        assert_eq!(set.resolve(SceneType::Geometry).name(), "geometry");
        assert_eq!(set.resolve(SceneType::Geometry).placeholders(), ["title"]);
        assert_eq!(set.resolve(SceneType::Proof).name(), "proof");
    }
}
