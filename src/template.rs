//! Template engine for stub responses.
//!
//! Uses Handlebars for rendering. Templates see two maps, `Path` and
//! `Query`, filled from the values captured while matching:
//!
//! ```text
//! {"id": "{{Path.id}}", "page": "{{default Query.page "1"}}"}
//! ```
//!
//! Go-style tags are translated before rendering: references with a
//! leading dot (`{{.Path.id}}`), trim markers (`{{- ... -}}`) and comments
//! (`{{/* ... */}}`). Go actions such as `if` or `range` are not; use the
//! Handlebars block helpers instead. Output is never HTML-escaped and
//! unknown keys render as empty.

use crate::error::Result;
use crate::matcher::MatchContext;
use handlebars::{Handlebars, Template};
use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

static MUSTACHE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^}]*\}\}").expect("mustache regex"));

// A `.` that starts a path expression: at the start of the tag body or
// after whitespace, `(`, `~` or a third `{`.
static LEADING_DOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[\s(~{])\.([A-Za-z_])").expect("leading dot regex"));

/// Data exposed to response templates.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    #[serde(rename = "Path")]
    pub path: &'a HashMap<String, String>,
    #[serde(rename = "Query")]
    pub query: &'a HashMap<String, String>,
}

impl<'a> From<&'a MatchContext> for TemplateContext<'a> {
    fn from(ctx: &'a MatchContext) -> Self {
        Self {
            path: &ctx.path_params,
            query: &ctx.query_params,
        }
    }
}

/// Template engine for rendering stub responses.
#[derive(Clone)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("now", Box::new(now_helper));

        // Stub bodies are JSON or plain text, never HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);

        Self { handlebars }
    }

    /// Render a response template with the captured path and query values.
    ///
    /// Syntax errors surface as [`StubError::TemplateParse`], failures while
    /// rendering as [`StubError::TemplateRender`].
    ///
    /// [`StubError::TemplateParse`]: crate::error::StubError::TemplateParse
    /// [`StubError::TemplateRender`]: crate::error::StubError::TemplateRender
    pub fn render(&self, template: &str, ctx: &MatchContext) -> Result<String> {
        let source = normalize(template);
        Template::compile(&source)?;
        Ok(self
            .handlebars
            .render_template(&source, &TemplateContext::from(ctx))?)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite Go-style tags into Handlebars syntax. Other tags are left alone.
fn normalize(template: &str) -> Cow<'_, str> {
    if !template.contains("{{") {
        return Cow::Borrowed(template);
    }
    MUSTACHE.replace_all(template, |caps: &regex::Captures<'_>| translate_tag(&caps[0]))
}

/// `{{- .Path.id -}}` becomes `{{~ Path.id ~}}`, `{{/* c */}}` becomes
/// `{{!-- c --}}`. A trim marker needs whitespace next to it, so `{{-3}}`
/// is left as it is.
fn translate_tag(tag: &str) -> String {
    let body = &tag[2..tag.len() - 2];

    let (open, body) = match body.strip_prefix('-') {
        Some(rest) if rest.starts_with(char::is_whitespace) => ("{{~", rest),
        _ => ("{{", body),
    };
    let (close, body) = match body.strip_suffix('-') {
        Some(rest) if rest.ends_with(char::is_whitespace) => ("~}}", rest),
        _ => ("}}", body),
    };

    // Handlebars comments take no whitespace control
    if let Some(comment) = body
        .trim()
        .strip_prefix("/*")
        .and_then(|c| c.strip_suffix("*/"))
    {
        return format!("{{{{!--{}--}}}}", comment);
    }

    format!("{}{}{}", open, LEADING_DOT.replace_all(body, "${1}${2}"), close)
}

// Custom Handlebars helpers

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    match h.param(0).map(|v| v.value()) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(v) if !v.is_null() && !v.is_string() => out.write(&v.to_string())?,
        _ => out.write(fallback)?,
    }
    Ok(())
}

/// `{{now}}` or `{{now "%Y-%m-%d"}}`, in UTC.
fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;
    use std::fmt::Write;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let mut rendered = String::new();
    if write!(rendered, "{}", Utc::now().format(format)).is_err() {
        return Err(handlebars::RenderErrorReason::Other(format!(
            "invalid time format: {}",
            format
        ))
        .into());
    }
    out.write(&rendered)?;
    Ok(())
}
