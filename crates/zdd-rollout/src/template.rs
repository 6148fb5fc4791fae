//! Placeholder substitution for proxy configuration templates.

use std::collections::BTreeMap;

/// Replace every `{key}` in `template` with `mapping[key]`.
///
/// Substitution is a single pass over the original text: placeholder spans
/// are located first and the output is assembled from literal slices and
/// mapped values, so an inserted value is never scanned again. Unknown
/// placeholders and stray braces are copied verbatim.
///
/// ```
/// use std::collections::BTreeMap;
/// use zdd_rollout::template::render;
///
/// let mapping = BTreeMap::from([("web".to_string(), "8001".to_string())]);
/// assert_eq!(render("proxy_pass http://127.0.0.1:{web};", &mapping),
///            "proxy_pass http://127.0.0.1:8001;");
/// ```
pub fn render(template: &str, mapping: &BTreeMap<String, String>) -> String {
    let spans = placeholder_spans(template, mapping);
    let extra: usize = spans.iter().map(|s| s.value.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);

    let mut cursor = 0;
    for span in spans {
        out.push_str(&template[cursor..span.start]);
        out.push_str(span.value);
        cursor = span.end;
    }
    out.push_str(&template[cursor..]);
    out
}

/// A located `{key}` occurrence and the value that replaces it.
struct Span<'a> {
    start: usize,
    end: usize,
    value: &'a str,
}

/// Non-overlapping placeholder spans in ascending order.
///
/// At each `{` the keys are tried in lexicographic order and the first
/// whose `{key}` matches wins.
fn placeholder_spans<'a>(template: &str, mapping: &'a BTreeMap<String, String>) -> Vec<Span<'a>> {
    let mut spans = Vec::new();
    let mut pos = 0;

    while let Some(offset) = template[pos..].find('{') {
        let start = pos + offset;
        let rest = &template[start + 1..];

        let hit = mapping.iter().find(|(key, _)| {
            rest.strip_prefix(key.as_str())
                .is_some_and(|after| after.starts_with('}'))
        });

        match hit {
            Some((key, value)) => {
                let end = start + key.len() + 2;
                spans.push(Span {
                    start,
                    end,
                    value: value.as_str(),
                });
                pos = end;
            }
            None => pos = start + 1,
        }
    }

    spans
}
