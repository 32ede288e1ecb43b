//! Template interpolation for configuration values.
//!
//! Configuration is rendered in two phases:
//!
//! 1. While the configuration is resolved, every string value is rendered
//!    against a [`TemplateContext`] (`{{ user.name }}`, `{{ build_name }}`,
//!    `{{ builder_type }}`).
//! 2. The `execute_command` field is left untouched in phase one and kept as
//!    a [`DeferredTemplate`]. Its consumer renders it later with values that
//!    only exist at run time.
//!
//! `user_variables` is the input of phase one and is never rendered itself.

use std::collections::BTreeMap;
use std::fmt;

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::DtlError;

/// Configuration key holding the deferred template.
pub const DEFERRED_FIELD: &str = "execute_command";

/// Configuration key holding the user variables.
pub const USER_VARIABLES_FIELD: &str = "user_variables";

/// Values available to templates while configuration is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateContext {
    /// Name of the build invoking the provisioner.
    pub build_name: String,
    /// Type of the builder that produced the machine.
    pub builder_type: String,
    /// User variables, addressed as `{{ user.<name> }}`.
    pub user: BTreeMap<String, String>,
}

fn strict_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

fn is_template(source: &str) -> bool {
    source.contains("{{") || source.contains("{%") || source.contains("{#")
}

/// Renders configuration strings against a [`TemplateContext`].
pub struct Interpolator {
    env: Environment<'static>,
    context: TemplateContext,
}

impl Interpolator {
    pub fn new(context: TemplateContext) -> Self {
        Self {
            env: strict_environment(),
            context,
        }
    }

    /// Renders a single template string.
    ///
    /// Strings without template markers are returned unchanged.
    pub fn render(&self, source: &str) -> Result<String, minijinja::Error> {
        if !is_template(source) {
            return Ok(source.to_string());
        }
        self.env.render_str(source, &self.context)
    }

    /// Interpolates every string in a configuration mapping in place.
    ///
    /// The top-level [`DEFERRED_FIELD`] and [`USER_VARIABLES_FIELD`] entries
    /// are skipped. Errors name the offending key path.
    pub fn interpolate_config(&self, config: &mut Value) -> Result<(), DtlError> {
        let Value::Mapping(map) = config else {
            return self.interpolate_value(config, "");
        };
        for (key, value) in map.iter_mut() {
            let name = key.as_str().unwrap_or_default();
            if name == DEFERRED_FIELD || name == USER_VARIABLES_FIELD {
                continue;
            }
            self.interpolate_value(value, name)?;
        }
        Ok(())
    }

    fn interpolate_value(&self, value: &mut Value, path: &str) -> Result<(), DtlError> {
        match value {
            Value::String(s) => {
                *s = self.render(s).map_err(|e| {
                    DtlError::Config(format!("failed to interpolate '{}': {}", path, e))
                })?;
            }
            Value::Sequence(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.interpolate_value(item, &format!("{}[{}]", path, index))?;
                }
            }
            Value::Mapping(map) => {
                for (key, item) in map.iter_mut() {
                    let child = match key.as_str() {
                        Some(k) if path.is_empty() => k.to_string(),
                        Some(k) => format!("{}.{}", path, k),
                        None => path.to_string(),
                    };
                    self.interpolate_value(item, &child)?;
                }
            }
            Value::Tagged(tagged) => self.interpolate_value(&mut tagged.value, path)?,
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        Ok(())
    }
}

/// A template kept literal during configuration resolution.
///
/// The owner of the runtime values calls [`DeferredTemplate::render`] once
/// they are known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeferredTemplate(String);

impl DeferredTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    /// Returns the unrendered template source.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Renders the template with runtime values exposed as top-level names.
    pub fn render(&self, runtime: &BTreeMap<String, String>) -> Result<String, DtlError> {
        if !is_template(&self.0) {
            return Ok(self.0.clone());
        }
        strict_environment()
            .render_str(&self.0, runtime)
            .map_err(|e| DtlError::Config(format!("failed to render '{}': {}", DEFERRED_FIELD, e)))
    }
}

impl fmt::Display for DeferredTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
