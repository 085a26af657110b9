//! Template engine for response bodies.
//!
//! Uses Handlebars for rendering with request context. Paths may also be
//! written with a leading dot (`{{.Request.Method}}`); such expressions are
//! normalized to plain Handlebars before rendering.

use crate::headers::canonical_name;
use crate::request::StubRequest;
use handlebars::{handlebars_helper, Handlebars};
use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Data available to a response template.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    #[serde(rename = "Request")]
    pub request: RequestContext,
    /// First value of each query parameter
    #[serde(rename = "Query")]
    pub query: BTreeMap<String, String>,
    /// Request body, when it is JSON
    #[serde(rename = "JSON", skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    /// Capture groups of a regex endpoint
    #[serde(rename = "RouteParam", skip_serializing_if = "Option::is_none")]
    pub route_param: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestContext {
    pub method: String,
    pub host: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "RequestURI")]
    pub request_uri: String,
    pub path: String,
    pub raw_query: String,
    /// Values per canonical header name
    pub header: BTreeMap<String, Vec<String>>,
    pub form: BTreeMap<String, Vec<String>>,
    pub post_form: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl TemplateContext {
    /// Build the context for one request.
    pub fn new(request: &StubRequest, route_params: Option<&[String]>) -> Self {
        let (path, raw_query) = request
            .target
            .split_once('?')
            .unwrap_or((request.target.as_str(), ""));

        let mut query = BTreeMap::new();
        for (name, value) in crate::matcher::parse_query(raw_query) {
            query.entry(name).or_insert(value);
        }

        let mut header: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in request.headers.iter() {
            header
                .entry(canonical_name(name))
                .or_default()
                .push(value.to_string());
        }

        Self {
            request: RequestContext {
                method: request.method.clone(),
                host: request.host.clone(),
                url: request.target.clone(),
                request_uri: request.target.clone(),
                path: path.to_string(),
                raw_query: raw_query.to_string(),
                header,
                form: group(request.form()),
                post_form: group(request.post_form()),
                body: String::from_utf8_lossy(&request.body).into_owned(),
            },
            query,
            json: request.json(),
            route_param: route_params.map(<[String]>::to_vec),
        }
    }
}

fn group(pairs: Vec<(String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in pairs {
        grouped.entry(name).or_default().push(value);
    }
    grouped
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("index", Box::new(index));
        handlebars.register_helper("form_value", Box::new(form_value));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Bodies are served verbatim, whatever their content type.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string with the given context.
    pub fn render(
        &self,
        template: &str,
        ctx: &TemplateContext,
    ) -> Result<String, handlebars::RenderError> {
        let template = normalize(template);
        self.handlebars.render_template(&template, ctx)
    }

    /// Render a template, falling back to the unexpanded source on failure.
    pub fn render_or_source(&self, template: &str, ctx: &TemplateContext) -> String {
        match self.render(template, ctx) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "Template expansion failed, sending source unexpanded");
                template.to_string()
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite dot-prefixed expressions into Handlebars syntax.
fn normalize(source: &str) -> Cow<'_, str> {
    if !source.contains("{{") {
        return Cow::Borrowed(source);
    }

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Cow::Owned(out);
        };

        let expr = &after[..end];
        out.push_str("{{");
        if expr.starts_with('!') {
            out.push_str(expr);
        } else {
            out.push_str(&normalize_expression(expr));
        }
        out.push_str("}}");
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    Cow::Owned(out)
}

fn form_value_call() -> &'static Regex {
    static FORM_VALUE: OnceLock<Regex> = OnceLock::new();
    FORM_VALUE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][\w.\-]*)\.FormValue\b").expect("valid FormValue regex")
    })
}

fn normalize_expression(expr: &str) -> String {
    let is_boundary = |c: char| c.is_whitespace() || matches!(c, '(' | '{' | '~' | '=');

    let mut out = String::with_capacity(expr.len());
    let mut quote = None;
    let mut prev = None;
    let mut chars = expr.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                out.push(ch);
            }
            None if ch == '.' && prev.map_or(true, is_boundary) => match chars.peek() {
                Some(&next) if next.is_alphabetic() || next == '_' => {}
                Some(&next) if !(is_boundary(next) || matches!(next, ')' | '}')) => out.push(ch),
                _ => out.push_str("this"),
            },
            None => out.push(ch),
        }
        prev = Some(ch);
    }

    form_value_call()
        .replace_all(&out, "form_value $1")
        .into_owned()
}

/// Walk into maps by name and lists by position.
fn lookup(args: &[&serde_json::Value]) -> serde_json::Value {
    let Some((base, keys)) = args.split_first() else {
        return serde_json::Value::Null;
    };

    let mut current = (*base).clone();
    for key in keys {
        let next = match (&current, key) {
            (serde_json::Value::Array(items), serde_json::Value::Number(n)) => {
                n.as_u64().and_then(|i| items.get(i as usize))
            }
            (serde_json::Value::Array(items), serde_json::Value::String(s)) => {
                s.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (serde_json::Value::Object(map), serde_json::Value::String(s)) => map.get(s),
            (serde_json::Value::Object(map), serde_json::Value::Number(n)) => {
                map.get(&n.to_string())
            }
            _ => None,
        };
        current = next.cloned().unwrap_or(serde_json::Value::Null);
    }
    current
}

handlebars_helper!(index: |*args| lookup(&args));

handlebars_helper!(form_value: |request: Json, name: str| {
    request
        .get("Form")
        .and_then(|form| form.get(name))
        .and_then(|values| values.get(0))
        .cloned()
        .unwrap_or_else(|| serde_json::Value::String(String::new()))
});

// Custom Handlebars helpers

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    out.write(&Utc::now().format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);

    let value = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(v) if !v.is_null() && !v.is_string() => out.write(&v.to_string())?,
        _ => out.write(default)?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}
