//! Strict total order over HTTP patterns.
//!
//! Route tables are matched first-match-wins, so backend routes must be
//! emitted most-specific-first or a broad wildcard shadows a narrower
//! template. The order implemented here:
//!
//! 1. wildcard-free templates before any template with a wildcard;
//! 2. among wildcard templates, fewer wildcard segments first;
//! 3. segment-wise comparison with literal < `*` < `**`; when one template
//!    is a proper prefix of the other, the longer one wins only when the
//!    last shared segment is `**` (a multi wildcard swallows its suffixed
//!    siblings, a single wildcard cannot);
//! 4. a trailing custom verb before the verbless equivalent;
//! 5. an exact HTTP method before the wildcard method on the same path;
//! ties broken by selector, then declaration order.

use std::cmp::Ordering;

use super::{Segment, UriTemplate};

/// Wildcard HTTP method token: the pattern matches any method.
pub const ANY_METHOD: &str = "*";

/// A pattern reference carrying everything the order needs.
#[derive(Debug, Clone, Copy)]
pub struct OrderedPattern<'a> {
    pub template: &'a UriTemplate,
    pub http_method: &'a str,
    pub selector: &'a str,
    pub declaration_index: usize,
}

/// Compare two patterns under the strict total order.
pub fn compare(a: &OrderedPattern<'_>, b: &OrderedPattern<'_>) -> Ordering {
    (!a.template.is_exact())
        .cmp(&!b.template.is_exact())
        .then_with(|| a.template.wildcard_count().cmp(&b.template.wildcard_count()))
        .then_with(|| compare_segments(a.template.segments(), b.template.segments()))
        .then_with(|| compare_verbs(a.template.verb(), b.template.verb()))
        .then_with(|| method_rank(a.http_method).cmp(&method_rank(b.http_method)))
        .then_with(|| a.http_method.cmp(b.http_method))
        .then_with(|| a.selector.cmp(b.selector))
        .then_with(|| a.declaration_index.cmp(&b.declaration_index))
}

/// Sort patterns in place under [`compare`].
pub fn sort_patterns(patterns: &mut [OrderedPattern<'_>]) {
    patterns.sort_by(compare);
}

fn compare_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    for (left, right) in a.iter().zip(b.iter()) {
        let ranked = left.specificity().cmp(&right.specificity());
        if ranked != Ordering::Equal {
            return ranked;
        }
        if let (Segment::Literal(left), Segment::Literal(right)) = (left, right) {
            let named = left.cmp(right);
            if named != Ordering::Equal {
                return named;
            }
        }
    }

    let shared = a.len().min(b.len());
    if a.len() == b.len() {
        return Ordering::Equal;
    }

    // One template is a proper prefix of the other. When the prefix ends in
    // a multi wildcard the shorter template matches everything the longer
    // one does, so the longer template must be tried first. Otherwise the
    // two cannot shadow each other and the shorter sorts first.
    let suffixed_wins =
        shared > 0 && matches!(a[shared - 1], Segment::MultiWildcard);
    match (a.len() < b.len(), suffixed_wins) {
        (true, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Less,
        (false, false) => Ordering::Greater,
    }
}

fn compare_verbs(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(left), Some(right)) => left.cmp(right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn method_rank(method: &str) -> u8 {
    if method == ANY_METHOD {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::UriTemplate;

    fn sorted(entries: &[(&str, &str)]) -> Vec<String> {
        let templates: Vec<(UriTemplate, &str)> = entries
            .iter()
            .map(|(template, method)| (UriTemplate::parse(template).expect(template), *method))
            .collect();
        let mut patterns: Vec<OrderedPattern<'_>> = templates
            .iter()
            .enumerate()
            .map(|(idx, (template, method))| OrderedPattern {
                template,
                http_method: method,
                selector: "svc.Method",
                declaration_index: idx,
            })
            .collect();
        sort_patterns(&mut patterns);
        patterns
            .iter()
            .map(|pattern| format!("{} {}", pattern.http_method, pattern.template))
            .collect()
    }

    #[test]
    fn specification_sequence() {
        let order = sorted(&[
            ("/foo/**", "GET"),
            ("/foo/**:verb", "GET"),
            ("/foo/bar", ANY_METHOD),
            ("/foo/*", "GET"),
            ("/foo/**/bar", "GET"),
            ("/foo/bar", "GET"),
            ("/foo/*/bar", "GET"),
        ]);
        assert_eq!(
            order,
            vec![
                "GET /foo/bar",
                "* /foo/bar",
                "GET /foo/*",
                "GET /foo/*/bar",
                "GET /foo/**/bar",
                "GET /foo/**:verb",
                "GET /foo/**",
            ]
        );
    }

    #[test]
    fn exact_templates_always_lead() {
        let order = sorted(&[("/a/*", "GET"), ("/z/exact", "GET")]);
        assert_eq!(order, vec!["GET /z/exact", "GET /a/*"]);
    }

    #[test]
    fn fewer_wildcards_first() {
        let order = sorted(&[("/a/*/b/*", "GET"), ("/z/*", "GET")]);
        assert_eq!(order, vec!["GET /z/*", "GET /a/*/b/*"]);
    }

    #[test]
    fn multi_wildcard_suffix_precedes_bare_multi() {
        let order = sorted(&[("/v1/**", "GET"), ("/v1/**/tail", "GET")]);
        assert_eq!(order, vec!["GET /v1/**/tail", "GET /v1/**"]);
    }

    #[test]
    fn single_wildcard_prefix_precedes_suffixed() {
        let order = sorted(&[("/v1/*/tail", "GET"), ("/v1/*", "GET")]);
        assert_eq!(order, vec!["GET /v1/*", "GET /v1/*/tail"]);
    }

    #[test]
    fn ties_fall_back_to_selector_then_declaration() {
        let template = UriTemplate::parse("/v1/*").expect("template");
        let mut patterns = vec![
            OrderedPattern {
                template: &template,
                http_method: "GET",
                selector: "b.Method",
                declaration_index: 0,
            },
            OrderedPattern {
                template: &template,
                http_method: "GET",
                selector: "a.Method",
                declaration_index: 1,
            },
        ];
        sort_patterns(&mut patterns);
        assert_eq!(patterns[0].selector, "a.Method");
    }

    #[test]
    fn comparison_is_antisymmetric() {
        let a_template = UriTemplate::parse("/foo/**/bar").expect("template");
        let b_template = UriTemplate::parse("/foo/**").expect("template");
        let a = OrderedPattern {
            template: &a_template,
            http_method: "GET",
            selector: "s.A",
            declaration_index: 0,
        };
        let b = OrderedPattern {
            template: &b_template,
            http_method: "GET",
            selector: "s.B",
            declaration_index: 1,
        };
        assert_eq!(compare(&a, &b), compare(&b, &a).reverse());
    }
}
