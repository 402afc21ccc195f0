//! Metric name normalization

/// Namespace token every exported metric name starts with
pub const NAMESPACE: &str = "asic";

const SEPARATOR: char = '_';

/// Normalize a raw field or metric name into a namespaced series name.
///
/// Lowercases, turns spaces, dashes, dots, slashes and underscores into a
/// single `_`, drops any other character, trims separators at both ends and
/// prepends `asic_` unless already present. Applying it twice yields the
/// same name.
pub fn normalize_metric_name(raw: &str) -> String {
    let mut body = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.chars() {
        match c {
            ' ' | '-' | '.' | '/' | '_' => pending_separator = true,
            c if c.is_ascii_alphanumeric() => {
                if pending_separator && !body.is_empty() {
                    body.push(SEPARATOR);
                }
                pending_separator = false;
                body.push(c.to_ascii_lowercase());
            }
            _ => {}
        }
    }

    if body.is_empty() || body == NAMESPACE {
        return NAMESPACE.to_string();
    }
    if body.starts_with(NAMESPACE) && body[NAMESPACE.len()..].starts_with(SEPARATOR) {
        return body;
    }
    format!("{}{}{}", NAMESPACE, SEPARATOR, body)
}
