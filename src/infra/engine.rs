//! Jinja-style template expansion with delimiters that coexist with LaTeX.
//!
//! | construct  | syntax          |
//! |------------|-----------------|
//! | statement  | `\BLOCK{ ... }` |
//! | expression | `\VAR{ ... }`   |
//! | comment    | `\#{ ... }`     |
//! | line stmt  | `%% ...`        |
//! | line note  | `%# ...`        |
//!
//! Undefined variables are errors rather than empty strings, and output is
//! never HTML-escaped.

use std::path::PathBuf;

use minijinja::syntax::SyntaxConfig;
use minijinja::{AutoEscape, Environment, UndefinedBehavior, path_loader};

use crate::application::ports::{ExpansionError, TemplateEngine};
use crate::domain::types::{RenderContext, TemplateSource};
use crate::infra::error::InfraError;

pub struct LatexTemplateEngine {
    env: Environment<'static>,
}

impl LatexTemplateEngine {
    /// Build an engine; `include_root` enables `\BLOCK{ include "..." }` of
    /// sibling templates.
    pub fn new(include_root: Option<PathBuf>) -> Result<Self, InfraError> {
        let syntax = SyntaxConfig::builder()
            .block_delimiters("\\BLOCK{", "}")
            .variable_delimiters("\\VAR{", "}")
            .comment_delimiters("\\#{", "}")
            .line_statement_prefix("%%")
            .line_comment_prefix("%#")
            .build()
            .map_err(|err| InfraError::template_engine(err.to_string()))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_trim_blocks(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("texescape", tex_escape);
        if let Some(root) = include_root {
            env.set_loader(path_loader(root));
        }

        Ok(Self { env })
    }
}

impl TemplateEngine for LatexTemplateEngine {
    fn expand(
        &self,
        template: &TemplateSource,
        context: &RenderContext,
    ) -> Result<String, ExpansionError> {
        self.env
            .render_named_str(&template.name, &template.source, context)
            .map_err(|err| ExpansionError::new(&template.name, err.to_string()))
    }
}

/// Escape LaTeX special characters in user-supplied text.
fn tex_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(ch),
        }
    }
    out
}
