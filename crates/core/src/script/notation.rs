//! Informal math notation → formal notation transforms.
//!
//! Transforms are pure and total: any input maps to some output and nothing
//! here can fail.

use std::sync::LazyLock;

use regex::Regex;

/// Converts equation text before it is bound into a script.
pub trait NotationTransform: Send + Sync {
    fn transform(&self, input: &str) -> String;
}

/// Leaves text untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityNotation;

impl NotationTransform for IdentityNotation {
    fn transform(&self, input: &str) -> String {
        input.to_string()
    }
}

/// Rewrites calculator-style notation into LaTeX.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatexNotation;

/// `sqrt(` with balanced content handled by [`rewrite_calls`].
const SQRT_CALL: &str = "sqrt(";

static POWER_GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\^\(([^()]*)\)").expect("valid regex"));
static POWER_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\^(-?[A-Za-z0-9.]+)").expect("valid regex"));
static GREEK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(^|[^\\A-Za-z0-9_])(pi|theta|alpha|beta|gamma|delta|lambda|sigma|phi|omega|infinity|inf)\b",
    )
    .expect("valid regex")
});
static IMPLICIT_MUL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\s*([A-Za-z(])").expect("valid regex"));
static CLOSE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s*\(").expect("valid regex"));

impl NotationTransform for LatexNotation {
    fn transform(&self, input: &str) -> String {
        let mut out = rewrite_calls(input, SQRT_CALL, &|inner| format!("\\sqrt{{{inner}}}"));
        out = POWER_GROUP_RE.replace_all(&out, "^{$1}").into_owned();
        out = POWER_TOKEN_RE.replace_all(&out, "^{$1}").into_owned();
        out = out
            .replace("<=", "\\leq ")
            .replace(">=", "\\geq ")
            .replace("!=", "\\neq ")
            .replace('*', "\\cdot ");
        GREEK_RE
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                let symbol = match &caps[2] {
                    "infinity" | "inf" => "infty",
                    other => other,
                };
                format!("{}\\{symbol}", &caps[1])
            })
            .into_owned()
    }
}

/// Rewrite every `name(...)` call with balanced parentheses using `wrap`.
///
/// Unbalanced calls are left as-is so the transform stays total.
fn rewrite_calls(input: &str, call: &str, wrap: &dyn Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(call) {
        let body_start = start + call.len();
        let Some(len) = balanced_len(&rest[body_start..]) else {
            break;
        };
        out.push_str(&rest[..start]);
        let inner = rewrite_calls(&rest[body_start..body_start + len], call, wrap);
        out.push_str(&wrap(&inner));
        rest = &rest[body_start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Byte length up to (not including) the `)` closing an already-open paren.
fn balanced_len(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize a plotted expression into Python arithmetic: `^` becomes `**`
/// and implicit multiplication (`2x`, `3(x+1)`, `(a)(b)`) is made explicit.
pub fn to_python_expression(input: &str) -> String {
    let out = input.trim().replace('^', "**");
    let out = IMPLICIT_MUL_RE.replace_all(&out, "$1*$2");
    CLOSE_OPEN_RE.replace_all(&out, ")*(").into_owned()
}

/// Right-hand side of `y = …`/`f(x) = …`, if the equation has that shape.
pub fn plotted_side(equation: &str) -> Option<&str> {
    let (lhs, rhs) = equation.split_once('=')?;
    let lhs = lhs.trim();
    let plottable = lhs == "y" || (lhs.len() == 4 && lhs.ends_with("(x)"));
    (plottable && !rhs.trim().is_empty()).then(|| rhs.trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
