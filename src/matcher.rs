//! Request matching logic.
//!
//! Picks the endpoint that best fits a request in a single pass over the
//! configured endpoints. Every endpoint whose method matches is checked by
//! URL, then declared query parameters, then declared headers. The first
//! endpoint to pass each of those checks takes over the selection, so a
//! later, more specific endpoint overrides an earlier, more generic one.

use crate::config::{parse_request_uri, EndpointSpec};
use crate::headers::HeaderList;
use axum::http::Uri;
use regex::Regex;
use tracing::{debug, trace, warn};

/// How the selected endpoint was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// No endpoint matched the method; the first endpoint is returned
    Fallback,
    /// First endpoint whose method matched
    Method,
    /// Path (or regex) match
    Url,
    /// Path match plus every declared query parameter
    Query,
    /// Declared headers all present on the request
    Headers,
}

/// Outcome of matching one request.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub endpoint: &'a EndpointSpec,
    /// Position of the endpoint in declaration order
    pub index: usize,
    pub specificity: Specificity,
    /// Capture groups of a regex endpoint matched against the request URL
    pub route_params: Option<Vec<String>>,
}

/// Request matcher engine.
pub struct Matcher {
    /// Compiled URL matchers, one per endpoint
    urls: Vec<CompiledUrl>,
}

enum CompiledUrl {
    Literal(LiteralUrl),
    Pattern(Regex),
    /// Never matches; only reachable for configs that skipped validation
    Invalid,
}

struct LiteralUrl {
    path: String,
    /// Declared parameters, first value per name
    query: Vec<(String, String)>,
}

/// Request target split into the parts the matcher compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Escaped path and query as received
    pub full: String,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RequestTarget {
    pub fn parse(url: &str) -> Self {
        let (path, raw_query) = match url.parse::<Uri>() {
            Ok(uri) => (uri.path().to_string(), uri.query().map(str::to_string)),
            Err(_) => match url.split_once('?') {
                Some((path, query)) => (path.to_string(), Some(query.to_string())),
                None => (url.to_string(), None),
            },
        };

        let full = match &raw_query {
            Some(query) => format!("{path}?{query}"),
            None => path.clone(),
        };
        let query = raw_query.as_deref().map(parse_query).unwrap_or_default();

        Self { full, path, query }
    }

    /// First value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        first_value(&self.query, name)
    }
}

/// Decode a query string into ordered pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

/// Unicode case-insensitive comparison.
fn eq_fold(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Running state of one matching pass.
struct Scan<'a> {
    endpoint: &'a EndpointSpec,
    index: usize,
    specificity: Specificity,
    method: bool,
    url: bool,
    query: bool,
    headers: bool,
}

impl<'a> Scan<'a> {
    fn seed(first: &'a EndpointSpec) -> Self {
        Self {
            endpoint: first,
            index: 0,
            specificity: Specificity::Fallback,
            method: false,
            url: false,
            query: false,
            headers: false,
        }
    }

    /// Select `endpoint` if nothing has passed `level` yet.
    fn escalate(&mut self, level: Specificity, index: usize, endpoint: &'a EndpointSpec) {
        let passed = match level {
            Specificity::Fallback => return,
            Specificity::Method => &mut self.method,
            Specificity::Url => &mut self.url,
            Specificity::Query => &mut self.query,
            Specificity::Headers => &mut self.headers,
        };
        if *passed {
            return;
        }
        *passed = true;

        trace!(index, url = %endpoint.url, level = ?level, "Endpoint escalated");
        self.endpoint = endpoint;
        self.index = index;
        self.specificity = level;
    }
}

impl Matcher {
    /// Create a new matcher from endpoint definitions.
    pub fn new(endpoints: &[EndpointSpec]) -> Self {
        let urls = endpoints.iter().map(compile_url).collect();
        Self { urls }
    }

    /// Find the best endpoint for a request.
    ///
    /// Returns `None` only when no endpoints are configured.
    pub fn find_endpoint<'a>(
        &self,
        endpoints: &'a [EndpointSpec],
        method: &str,
        url: &str,
        headers: &HeaderList,
    ) -> Option<Selection<'a>> {
        let first = endpoints.first()?;
        let target = RequestTarget::parse(url);

        let scan = endpoints
            .iter()
            .enumerate()
            .fold(Scan::seed(first), |scan, (index, endpoint)| {
                self.consider(scan, index, endpoint, method, &target, headers)
            });

        debug!(
            method = %method,
            url = %url,
            index = scan.index,
            endpoint = %scan.endpoint.url,
            specificity = ?scan.specificity,
            "Endpoint selected"
        );

        Some(Selection {
            endpoint: scan.endpoint,
            index: scan.index,
            specificity: scan.specificity,
            route_params: self.route_params(scan.index, &target),
        })
    }

    fn consider<'a>(
        &self,
        mut scan: Scan<'a>,
        index: usize,
        endpoint: &'a EndpointSpec,
        method: &str,
        target: &RequestTarget,
        headers: &HeaderList,
    ) -> Scan<'a> {
        if !eq_fold(method, &endpoint.method) {
            trace!(index, method = %endpoint.method, "Method doesn't match");
            return scan;
        }
        scan.escalate(Specificity::Method, index, endpoint);

        match self.urls.get(index) {
            Some(CompiledUrl::Pattern(regex)) => {
                if regex.is_match(&target.full) {
                    scan.escalate(Specificity::Url, index, endpoint);
                } else {
                    trace!(index, pattern = %regex, url = %target.full, "Regex doesn't match");
                }
                // Regex endpoints never compete on query string or headers.
                return scan;
            }
            Some(CompiledUrl::Literal(literal)) => {
                if !eq_fold(&target.path, &literal.path) {
                    return scan;
                }
                scan.escalate(Specificity::Url, index, endpoint);

                if let Some((name, expected)) = literal
                    .query
                    .iter()
                    .find(|(name, expected)| !value_matches(expected, target.query_value(name)))
                {
                    trace!(index, name = %name, expected = %expected, "Query string doesn't match");
                    return scan;
                }
                if !literal.query.is_empty() {
                    scan.escalate(Specificity::Query, index, endpoint);
                }
            }
            Some(CompiledUrl::Invalid) | None => return scan,
        }

        if let Some(name) = endpoint
            .headers
            .names()
            .into_iter()
            .find(|name| {
                let expected = endpoint.headers.get(name).unwrap_or("");
                !value_matches(expected, headers.get(name))
            })
        {
            trace!(index, header = %name, "Header doesn't match");
            return scan;
        }
        scan.escalate(Specificity::Headers, index, endpoint);

        scan
    }

    /// Capture groups of a regex endpoint; `None` for literal endpoints.
    fn route_params(&self, index: usize, target: &RequestTarget) -> Option<Vec<String>> {
        let CompiledUrl::Pattern(regex) = self.urls.get(index)? else {
            return None;
        };
        let params = regex
            .captures(&target.full)
            .map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        Some(params)
    }
}

/// A declared value matches when it is empty and the request carries the
/// name at all, or when it equals the first request value ignoring case.
fn value_matches(expected: &str, actual: Option<&str>) -> bool {
    match actual {
        Some(actual) => expected.is_empty() || eq_fold(expected, actual),
        None => false,
    }
}

fn compile_url(endpoint: &EndpointSpec) -> CompiledUrl {
    if let Some(pattern) = endpoint.url_pattern() {
        return match Regex::new(pattern) {
            Ok(regex) => CompiledUrl::Pattern(regex),
            Err(e) => {
                warn!(
                    url = %endpoint.url,
                    error = %e,
                    "Invalid endpoint pattern, it will never match"
                );
                CompiledUrl::Invalid
            }
        };
    }

    match parse_request_uri(&endpoint.url) {
        Ok(uri) => {
            let mut query: Vec<(String, String)> = Vec::new();
            for (name, value) in uri.query().map(parse_query).unwrap_or_default() {
                if first_value(&query, &name).is_none() {
                    query.push((name, value));
                }
            }
            CompiledUrl::Literal(LiteralUrl {
                path: uri.path().to_string(),
                query,
            })
        }
        Err(e) => {
            warn!(error = %e, "Invalid endpoint url, it will never match");
            CompiledUrl::Invalid
        }
    }
}
