//! URL joining and `{name}` placeholder expansion.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left as-is by simple `{name}` expansion (RFC 3986 unreserved).
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Returns `true` if `url` starts with an `http://` or `https://` scheme.
#[must_use]
pub fn is_absolute(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Join a base URL and a relative URL with exactly one slash between them.
///
/// Absolute URLs and empty bases are returned unchanged.
///
/// ```
/// use volley_core::join_url;
///
/// assert_eq!(join_url("https://api.test/v1/", "/users"), "https://api.test/v1/users");
/// assert_eq!(join_url("https://api.test", "https://other.test/x"), "https://other.test/x");
/// ```
#[must_use]
pub fn join_url(base: &str, url: &str) -> String {
    if base.is_empty() || is_absolute(url) {
        return url.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// Expand `{name}` and `{+name}` placeholders.
///
/// `{name}` is replaced by the percent-encoded value, `{+name}` by the raw value.
/// Placeholders without a value are left untouched.
///
/// ```
/// use std::collections::BTreeMap;
/// use volley_core::expand;
///
/// let params = BTreeMap::from([
///     ("id".to_string(), "a b".to_string()),
///     ("path".to_string(), "x/y".to_string()),
/// ]);
/// assert_eq!(expand("/users/{id}/{+path}/{other}", &params), "/users/a%20b/x/y/{other}");
/// ```
#[must_use]
pub fn expand(template: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((before, after)) = rest.split_once('{') {
        out.push_str(before);
        let Some((placeholder, tail)) = after.split_once('}') else {
            out.push('{');
            out.push_str(after);
            return out;
        };

        let (raw, name) = match placeholder.strip_prefix('+') {
            Some(name) => (true, name),
            None => (false, placeholder),
        };

        match params.get(name) {
            Some(value) if raw => out.push_str(value),
            Some(value) => out.extend(utf8_percent_encode(value, UNRESERVED)),
            None => {
                out.push('{');
                out.push_str(placeholder);
                out.push('}');
            }
        }
        rest = tail;
    }

    out.push_str(rest);
    out
}
