//! Predicates available out of the box.
//!
//! They are registered in presumed cost order: cheap comparisons of the
//! method or a single header first, pattern matching later.

use std::rc::Rc;

use anyhow::{anyhow, bail};
use glob::Pattern;
use serde_json::Value;

use crate::predicate::{Predicate, PredicateFactory, PredicateList, Request};

/// Wraps a fallible constructor into a [`PredicateFactory`].
pub fn factory<P, F>(build: F) -> PredicateFactory
where
    P: Predicate + 'static,
    F: Fn(&Value) -> anyhow::Result<P> + 'static,
{
    Rc::new(move |value: &Value| -> anyhow::Result<Box<dyn Predicate>> {
        Ok(Box::new(build(value)?))
    })
}

/// Registers the default predicates.
pub fn add_defaults(list: &mut PredicateList) {
    list.add("xhr", factory(Xhr::new), [], []);
    list.add("request_method", factory(RequestMethod::new), [], []);
    list.add("path_info", factory(PathInfo::new), [], []);
    list.add("request_param", factory(RequestParam::new), [], []);
    list.add("header", factory(Header::new), [], []);
    list.add("accept", factory(Accept::new), [], []);
}

/// A string or an array of strings.
fn strings(value: &Value) -> anyhow::Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("expected a string, got {item}"))
            })
            .collect(),
        other => bail!("expected a string or an array of strings, got {other}"),
    }
}

pub struct Xhr(bool);

impl Xhr {
    pub fn new(value: &Value) -> anyhow::Result<Self> {
        value
            .as_bool()
            .map(Self)
            .ok_or_else(|| anyhow!("expected a boolean, got {value}"))
    }
}

impl Predicate for Xhr {
    fn text(&self) -> String {
        format!("xhr = {}", self.0)
    }

    fn matches(&self, request: &dyn Request) -> bool {
        let is_xhr = request
            .header("X-Requested-With")
            .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"));
        is_xhr == self.0
    }
}

/// Matches one of the given methods. `GET` implies `HEAD`.
pub struct RequestMethod(Vec<String>);

impl RequestMethod {
    pub fn new(value: &Value) -> anyhow::Result<Self> {
        let mut methods: Vec<String> = strings(value)?
            .into_iter()
            .map(|method| method.to_ascii_uppercase())
            .collect();

        if methods.iter().any(|method| method == "GET") {
            methods.push("HEAD".into());
        }

        methods.sort();
        methods.dedup();
        Ok(Self(methods))
    }
}

impl Predicate for RequestMethod {
    fn text(&self) -> String {
        format!("request_method = {}", self.0.join(","))
    }

    fn matches(&self, request: &dyn Request) -> bool {
        self.0.iter().any(|method| method == request.method())
    }
}

/// Matches the request path against a glob pattern.
pub struct PathInfo(Pattern);

impl PathInfo {
    pub fn new(value: &Value) -> anyhow::Result<Self> {
        let pattern = value
            .as_str()
            .ok_or_else(|| anyhow!("expected a glob pattern, got {value}"))?;
        Ok(Self(Pattern::new(pattern)?))
    }
}

impl Predicate for PathInfo {
    fn text(&self) -> String {
        format!("path_info = {}", self.0.as_str())
    }

    fn matches(&self, request: &dyn Request) -> bool {
        self.0.matches(request.path())
    }
}

/// Splits `name<sep>value` into its parts.
fn requirement(input: &str, sep: char) -> (String, Option<String>) {
    match input.split_once(sep) {
        Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
        None => (input.trim().to_string(), None),
    }
}

/// Requires parameters to be present, or to have a given value with
/// `name=value`.
pub struct RequestParam(Vec<(String, Option<String>)>);

impl RequestParam {
    pub fn new(value: &Value) -> anyhow::Result<Self> {
        let mut reqs: Vec<_> = strings(value)?
            .iter()
            .map(|input| requirement(input, '='))
            .collect();
        reqs.sort();
        Ok(Self(reqs))
    }
}

impl Predicate for RequestParam {
    fn text(&self) -> String {
        let reqs: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("{name}={value}"),
                None => name.clone(),
            })
            .collect();
        format!("request_param {}", reqs.join(","))
    }

    fn matches(&self, request: &dyn Request) -> bool {
        self.0.iter().all(|(name, expected)| match request.param(name) {
            Some(actual) => expected.as_deref().is_none_or(|expected| expected == actual),
            None => false,
        })
    }
}

/// Requires a header to be present, or to match a glob with `Name:pattern`.
pub struct Header {
    name: String,
    pattern: Option<Pattern>,
}

impl Header {
    pub fn new(value: &Value) -> anyhow::Result<Self> {
        let input = value
            .as_str()
            .ok_or_else(|| anyhow!("expected a header name, got {value}"))?;

        let (name, pattern) = requirement(input, ':');
        let pattern = pattern.map(|p| Pattern::new(&p)).transpose()?;
        Ok(Self { name, pattern })
    }
}

impl Predicate for Header {
    fn text(&self) -> String {
        match &self.pattern {
            Some(pattern) => format!("header {}:{}", self.name, pattern.as_str()),
            None => format!("header {}", self.name),
        }
    }

    fn matches(&self, request: &dyn Request) -> bool {
        match (request.header(&self.name), &self.pattern) {
            (Some(value), Some(pattern)) => pattern.matches(value),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Requires the `Accept` header to allow one of the given media types.
pub struct Accept(Vec<String>);

impl Accept {
    pub fn new(value: &Value) -> anyhow::Result<Self> {
        let mut types = strings(value)?;
        types.sort();
        Ok(Self(types))
    }
}

impl Predicate for Accept {
    fn text(&self) -> String {
        format!("accept = {}", self.0.join(", "))
    }

    fn matches(&self, request: &dyn Request) -> bool {
        let Some(accept) = request.header("Accept") else {
            return false;
        };

        accept
            .split(',')
            .map(|part| part.split(';').next().unwrap_or_default().trim())
            .any(|offered| {
                offered == "*/*"
                    || self.0.iter().any(|wanted| {
                        wanted == offered
                            || offered
                                .strip_suffix("/*")
                                .is_some_and(|major| wanted.split('/').next() == Some(major))
                    })
            })
    }
}

#[cfg(test)]
pub(crate) use test_request::TestRequest;

#[cfg(test)]
mod test_request {
    use std::collections::HashMap;

    use crate::predicate::Request;

    #[derive(Default)]
    pub(crate) struct TestRequest {
        pub method: String,
        pub path: String,
        pub headers: HashMap<String, String>,
        pub params: HashMap<String, String>,
    }

    impl TestRequest {
        pub fn new(method: &str, path: &str) -> Self {
            Self {
                method: method.into(),
                path: path.into(),
                ..Default::default()
            }
        }

        pub fn get(path: &str) -> Self {
            Self::new("GET", path)
        }

        pub fn header(mut self, name: &str, value: &str) -> Self {
            self.headers.insert(name.into(), value.into());
            self
        }

        pub fn param(mut self, name: &str, value: &str) -> Self {
            self.params.insert(name.into(), value.into());
            self
        }
    }

    impl Request for TestRequest {
        fn method(&self) -> &str {
            &self.method
        }

        fn path(&self) -> &str {
            &self.path
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }

        fn param(&self, name: &str) -> Option<&str> {
            self.params.get(name).map(String::as_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_method_implies_head() {
        let pred = RequestMethod::new(&json!(["get", "POST"])).unwrap();

        assert_eq!(pred.text(), "request_method = GET,HEAD,POST");
        assert!(pred.matches(&TestRequest::new("HEAD", "/")));
        assert!(!pred.matches(&TestRequest::new("PUT", "/")));
    }

    #[test]
    fn test_request_param() {
        let pred = RequestParam::new(&json!(["page", "sort=asc"])).unwrap();

        assert!(pred.matches(&TestRequest::get("/").param("page", "2").param("sort", "asc")));
        assert!(!pred.matches(&TestRequest::get("/").param("page", "2").param("sort", "desc")));
        assert!(!pred.matches(&TestRequest::get("/").param("sort", "asc")));
    }

    #[test]
    fn test_header_pattern() {
        let pred = Header::new(&json!("Content-Type: application/*")).unwrap();

        assert_eq!(pred.text(), "header Content-Type:application/*");
        assert!(pred.matches(&TestRequest::get("/").header("Content-Type", "application/json")));
        assert!(!pred.matches(&TestRequest::get("/").header("Content-Type", "text/html")));
        assert!(!pred.matches(&TestRequest::get("/")));
    }

    #[test]
    fn test_xhr() {
        let pred = Xhr::new(&json!(true)).unwrap();

        assert!(pred.matches(&TestRequest::get("/").header("X-Requested-With", "XMLHttpRequest")));
        assert!(!pred.matches(&TestRequest::get("/")));
        assert!(Xhr::new(&json!("yes")).is_err());
    }

    #[test]
    fn test_accept() {
        let pred = Accept::new(&json!("application/json")).unwrap();

        assert!(pred.matches(&TestRequest::get("/").header("Accept", "text/html, application/json;q=0.9")));
        assert!(pred.matches(&TestRequest::get("/").header("Accept", "application/*")));
        assert!(!pred.matches(&TestRequest::get("/").header("Accept", "text/html")));
        assert!(!pred.matches(&TestRequest::get("/")));
    }

    #[test]
    fn test_path_info_rejects_bad_pattern() {
        assert!(PathInfo::new(&json!("/a/[")).is_err());
        assert!(PathInfo::new(&json!(1)).is_err());
    }
}
