//! `${name}` placeholder substitution.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::params::ValidatedParameters;

const EMBEDDED_NGINX: &str = include_str!("../../templates/nginx.conf.in");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("template '{template}' references ${{{name}}} at byte {offset}, which has no value")]
    MissingPlaceholder {
        template: String,
        name: String,
        offset: usize,
    },
    #[error("template '{template}' has a malformed placeholder at byte {offset}")]
    MalformedPlaceholder { template: String, offset: usize },
    #[error("failed to read template {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Non-fatal findings from a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderWarning {
    UnusedVariable { name: String },
}

impl fmt::Display for RenderWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderWarning::UnusedVariable { name } => {
                write!(f, "variable '{}' is not referenced by the template", name)
            }
        }
    }
}

/// A configuration template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
}

impl Template {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// The nginx template shipped with the crate.
    pub fn embedded() -> Self {
        Self::new("embedded:nginx.conf.in", EMBEDDED_NGINX)
    }

    pub fn from_file(path: &Path) -> Result<Self, RenderError> {
        let source = fs::read_to_string(path).map_err(|e| RenderError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(path.display().to_string(), source))
    }

    /// Custom template when configured, embedded otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, RenderError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::embedded()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Rendered configuration text. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    bytes: Vec<u8>,
    warnings: Vec<RenderWarning>,
}

impl RenderedConfig {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn warnings(&self) -> &[RenderWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Render `template` with the validated parameters.
pub fn render(template: &Template, params: &ValidatedParameters) -> Result<RenderedConfig, RenderError> {
    let rendered = substitute(template, &params.variables())?;
    for warning in rendered.warnings() {
        tracing::warn!(template = %template.name(), "{}", warning);
    }
    tracing::debug!(template = %template.name(), bytes = rendered.len(), "Template rendered");
    Ok(rendered)
}

/// Fill placeholders in a single configuration value, such as a URL.
pub fn render_value(name: &str, source: &str, params: &ValidatedParameters) -> Result<String, RenderError> {
    let rendered = substitute(&Template::new(name, source), &params.variables())?;
    Ok(String::from_utf8_lossy(rendered.as_bytes()).into_owned())
}

/// Single left-to-right pass; output is never rescanned.
pub(crate) fn substitute(
    template: &Template,
    vars: &BTreeMap<&'static str, String>,
) -> Result<RenderedConfig, RenderError> {
    let src = template.source();
    let mut out = String::with_capacity(src.len());
    let mut used = BTreeSet::new();
    let mut rest = src;
    let mut consumed = 0;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let offset = consumed + start;
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| RenderError::MalformedPlaceholder {
            template: template.name().to_string(),
            offset,
        })?;
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(RenderError::MalformedPlaceholder {
                template: template.name().to_string(),
                offset,
            });
        }
        let value = vars.get(name).ok_or_else(|| RenderError::MissingPlaceholder {
            template: template.name().to_string(),
            name: name.to_string(),
            offset,
        })?;
        out.push_str(value);
        used.insert(name);

        let advance = start + 2 + end + 1;
        consumed += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);

    let warnings = vars
        .keys()
        .filter(|k| !used.contains(**k))
        .map(|k| RenderWarning::UnusedVariable { name: k.to_string() })
        .collect();

    Ok(RenderedConfig {
        bytes: out.into_bytes(),
        warnings,
    })
}
