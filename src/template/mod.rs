//! URI template parsing and matcher rendering.
//!
//! HTTP bindings use path templates made of literal segments, single-segment
//! wildcards (`*`), multi-segment wildcards (`**`), variable bindings
//! (`{name}` / `{name=shelves/*}`) and an optional trailing custom verb
//! (`:verb`). Templates are parsed once during model construction and then
//! rendered into the proxy's match forms: wildcard-free templates become two
//! exact path matchers (with and without a trailing slash), everything else
//! becomes a single anchored regex.
//!
//! Rendering is deterministic: literals are regex-escaped, a single wildcard
//! never crosses a `/`, a multi wildcard always may, and the
//! colon-in-wildcard restriction branches the same way for every caller.

pub mod sort;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, Result};

static VARIABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("static regex"));

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    /// `*`: matches exactly one segment.
    SingleWildcard,
    /// `**`: matches zero or more segments, slashes included.
    MultiWildcard,
}

impl Segment {
    fn specificity(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::SingleWildcard => 1,
            Segment::MultiWildcard => 2,
        }
    }
}

/// A parsed URI template.
///
/// Immutable once constructed; equality is structural and is what duplicate
/// binding detection uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UriTemplate {
    segments: Vec<Segment>,
    verb: Option<String>,
}

impl UriTemplate {
    /// Parse a path template, failing on any syntax error.
    pub fn parse(template: &str) -> Result<Self> {
        if template.is_empty() {
            return Err(Error::description("path template cannot be empty"));
        }
        if !template.starts_with('/') {
            return Err(Error::description(format!(
                "path template '{}' must start with '/'",
                template
            )));
        }

        let (path, verb) = split_verb(template)?;

        let mut segments = Vec::new();
        if path != "/" {
            for raw in split_path_segments(&path[1..]) {
                parse_segment(template, &raw, &mut segments)?;
            }
        }

        Ok(Self { segments, verb })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Whether the template contains no wildcard segments.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn wildcard_count(&self) -> usize {
        self.segments.iter().filter(|segment| !matches!(segment, Segment::Literal(_))).count()
    }

    /// The exact path of a wildcard-free template, verb included.
    ///
    /// Callers wanting the trailing-slash variant append `/` themselves; the
    /// two forms together satisfy the trailing-slash match invariant.
    pub fn exact_path(&self) -> String {
        debug_assert!(self.is_exact());
        let mut path = String::new();
        if self.segments.is_empty() {
            path.push('/');
        } else {
            for segment in &self.segments {
                path.push('/');
                if let Segment::Literal(value) = segment {
                    path.push_str(value);
                }
            }
        }
        if let Some(verb) = &self.verb {
            path.push(':');
            path.push_str(verb);
        }
        path
    }

    /// Render the anchored match regex for a wildcard template.
    ///
    /// `disallow_colon` excludes `:` from wildcard segments so a custom verb
    /// suffix can never be swallowed by a wildcard.
    pub fn matching_regex(&self, disallow_colon: bool) -> String {
        let mut pattern = String::from("^");
        if self.segments.is_empty() {
            pattern.push('/');
        } else {
            for segment in &self.segments {
                pattern.push('/');
                match segment {
                    Segment::Literal(value) => pattern.push_str(&regex::escape(value)),
                    Segment::SingleWildcard => {
                        pattern.push_str(if disallow_colon { "[^/:]+" } else { "[^/]+" })
                    }
                    Segment::MultiWildcard => {
                        pattern.push_str(if disallow_colon { "[^:]*" } else { ".*" })
                    }
                }
            }
        }
        if let Some(verb) = &self.verb {
            pattern.push(':');
            pattern.push_str(&regex::escape(verb));
        }
        pattern.push_str("/?$");
        pattern
    }
}

impl std::fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")?;
        } else {
            for segment in &self.segments {
                match segment {
                    Segment::Literal(value) => write!(f, "/{}", value)?,
                    Segment::SingleWildcard => write!(f, "/*")?,
                    Segment::MultiWildcard => write!(f, "/**")?,
                }
            }
        }
        if let Some(verb) = &self.verb {
            write!(f, ":{}", verb)?;
        }
        Ok(())
    }
}

/// Split a trailing `:verb` off the template, if present.
///
/// The verb marker is the last `:` that sits after the last `/` and outside
/// any variable braces.
fn split_verb(template: &str) -> Result<(&str, Option<String>)> {
    let mut depth = 0usize;
    let mut verb_at = None;
    for (idx, ch) in template.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::description(format!("unbalanced '}}' in path template '{}'", template))
                })?;
            }
            '/' if depth == 0 => verb_at = None,
            ':' if depth == 0 => verb_at = Some(idx),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::description(format!("unbalanced '{{' in path template '{}'", template)));
    }

    match verb_at {
        Some(idx) => {
            let verb = &template[idx + 1..];
            if verb.is_empty() {
                return Err(Error::description(format!(
                    "path template '{}' has an empty custom verb",
                    template
                )));
            }
            if verb.contains([':', '{', '}', '*']) {
                return Err(Error::description(format!(
                    "path template '{}' has an invalid custom verb '{}'",
                    template, verb
                )));
            }
            Ok((&template[..idx], Some(verb.to_string())))
        }
        None => Ok((template, None)),
    }
}

/// Split on `/`, but never inside variable braces: the pattern of
/// `{name=shelves/*}` stays one raw segment. Brace balance was already
/// validated by [`split_verb`].
fn split_path_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in path.chars() {
        match ch {
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '/' if depth == 0 => segments.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    segments.push(current);
    segments
}

fn parse_segment(template: &str, raw: &str, out: &mut Vec<Segment>) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::description(format!(
            "path template '{}' contains an empty segment",
            template
        )));
    }

    match raw {
        "**" => {
            out.push(Segment::MultiWildcard);
            return Ok(());
        }
        "*" => {
            out.push(Segment::SingleWildcard);
            return Ok(());
        }
        _ => {}
    }

    if raw.starts_with('{') {
        if !raw.ends_with('}') {
            return Err(Error::description(format!(
                "path template '{}' has a malformed variable '{}'",
                template, raw
            )));
        }
        let inner = &raw[1..raw.len() - 1];
        let (name, pattern) = match inner.split_once('=') {
            Some((name, pattern)) => (name, Some(pattern)),
            None => (inner, None),
        };
        if !VARIABLE_NAME.is_match(name) {
            return Err(Error::description(format!(
                "path template '{}' has an invalid variable name '{}'",
                template, name
            )));
        }
        match pattern {
            // A bare variable binds exactly one segment.
            None => out.push(Segment::SingleWildcard),
            Some(pattern) => {
                if pattern.is_empty() {
                    return Err(Error::description(format!(
                        "path template '{}' has an empty variable pattern for '{}'",
                        template, name
                    )));
                }
                for sub in pattern.split('/') {
                    match sub {
                        "**" => out.push(Segment::MultiWildcard),
                        "*" => out.push(Segment::SingleWildcard),
                        literal => {
                            validate_literal(template, literal)?;
                            out.push(Segment::Literal(literal.to_string()));
                        }
                    }
                }
            }
        }
        return Ok(());
    }

    validate_literal(template, raw)?;
    out.push(Segment::Literal(raw.to_string()));
    Ok(())
}

fn validate_literal(template: &str, literal: &str) -> Result<()> {
    if literal.is_empty() {
        return Err(Error::description(format!(
            "path template '{}' contains an empty segment",
            template
        )));
    }
    if literal.contains(['{', '}', '*', ':']) {
        return Err(Error::description(format!(
            "path template '{}' contains an invalid literal segment '{}'",
            template, literal
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(template: &str) -> UriTemplate {
        UriTemplate::parse(template).expect(template)
    }

    #[test]
    fn parses_literals_and_wildcards() {
        let template = parse("/shelves/*/books/**");
        assert_eq!(
            template.segments(),
            &[
                Segment::Literal("shelves".into()),
                Segment::SingleWildcard,
                Segment::Literal("books".into()),
                Segment::MultiWildcard,
            ]
        );
        assert_eq!(template.wildcard_count(), 2);
        assert!(!template.is_exact());
    }

    #[test]
    fn parses_variables() {
        let template = parse("/v1/{name=shelves/*}/books/{book}");
        assert_eq!(template.to_string(), "/v1/shelves/*/books/*");
    }

    #[test]
    fn parses_trailing_verb() {
        let template = parse("/v1/shelves/*:move");
        assert_eq!(template.verb(), Some("move"));
        assert_eq!(template.to_string(), "/v1/shelves/*:move");
    }

    #[test]
    fn verb_after_variable() {
        let template = parse("/v1/{name=shelves/**}:undelete");
        assert_eq!(template.verb(), Some("undelete"));
        assert_eq!(template.to_string(), "/v1/shelves/**:undelete");
    }

    #[test]
    fn root_template() {
        let template = parse("/");
        assert!(template.is_exact());
        assert_eq!(template.exact_path(), "/");
    }

    #[test]
    fn rejects_malformed_templates() {
        for bad in [
            "",
            "shelves",
            "/shelves//books",
            "/shelves/{name",
            "/shelves/{=*}",
            "/shelves/{name=}",
            "/shelves/b*oks",
            "/shelves:",
            "/shelves:a:b{",
            "/shel:ves/books",
        ] {
            assert!(UriTemplate::parse(bad).is_err(), "expected failure for {:?}", bad);
        }
    }

    #[test]
    fn exact_path_includes_verb() {
        let template = parse("/v1/shelves:batchGet");
        assert!(template.is_exact());
        assert_eq!(template.exact_path(), "/v1/shelves:batchGet");
    }

    #[test]
    fn regex_escapes_literals() {
        let template = parse("/v1/shelves.books/*");
        assert_eq!(template.matching_regex(false), r"^/v1/shelves\.books/[^/]+/?$");
    }

    #[test]
    fn regex_branches_on_colon_option() {
        let template = parse("/v1/**");
        assert_eq!(template.matching_regex(false), "^/v1/.*/?$");
        assert_eq!(template.matching_regex(true), "^/v1/[^:]*/?$");

        let single = parse("/v1/*");
        assert_eq!(single.matching_regex(false), "^/v1/[^/]+/?$");
        assert_eq!(single.matching_regex(true), "^/v1/[^/:]+/?$");
    }

    #[test]
    fn regex_appends_verb_before_anchor() {
        let template = parse("/v1/shelves/**:move");
        assert_eq!(template.matching_regex(false), "^/v1/shelves/.*:move/?$");
    }

    #[test]
    fn rendered_regexes_compile() {
        for raw in ["/", "/v1/*", "/v1/**", "/v1/{a=b/*/c}/**:verb", "/v1/a.b-c_d/~e"] {
            let template = parse(raw);
            let rendered = template.matching_regex(true);
            regex::Regex::new(&rendered).expect("rendered regex must compile");
        }
    }

    #[test]
    fn duplicate_detection_is_structural() {
        let a = parse("/v1/{name=shelves/*}");
        let b = parse("/v1/shelves/*");
        assert_eq!(a, b);
    }
}
