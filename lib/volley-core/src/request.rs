//! Outgoing HTTP requests.
//!
//! A [`Request`] is the fully resolved form of one dispatch: URL with query, header map,
//! encoded body, and the options the transport still needs (timeouts, redirects, sink,
//! stats callback).
//!
//! # Example
//!
//! ```
//! use volley_core::{Method, Request, RequestOptions};
//! use serde_json::json;
//!
//! let options = RequestOptions::new()
//!     .header("Content-Type", "application/json")
//!     .query("page", "1")
//!     .json(json!({"name": "Jane"}));
//! let request = Request::build(Method::Post, "https://api.example.com/users", options)
//!     .expect("valid request");
//!
//! assert_eq!(request.url().as_str(), "https://api.example.com/users?page=1");
//! assert!(request.is_json());
//! assert_eq!(request.data().get("name"), Some(&json!("Jane")));
//! ```

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use url::Url;

use crate::{ContentType, Error, Form, Method, RequestOptions, Result};

/// An HTTP request with method, URL, headers, body and transport options.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    options: RequestOptions,
}

impl Request {
    /// Resolve `options` into a request for `url`.
    ///
    /// Query parameters are appended to the URL, cookies become a `Cookie` header,
    /// basic credentials an `Authorization` header, and the body is encoded from the
    /// first present of `multipart`, `form_params`, `json` and `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, a header name or value is invalid, or
    /// the body cannot be serialized.
    pub fn build(method: Method, url: &str, options: RequestOptions) -> Result<Self> {
        let mut url = Url::parse(url)?;
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.query);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            insert_header(&mut headers, name, value)?;
        }

        if !options.cookies.is_empty() {
            let cookie = options
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            insert_header(&mut headers, COOKIE.as_str(), &cookie)?;
        }

        if let Some(value) = options.auth.as_ref().and_then(crate::Auth::header_value) {
            insert_header(&mut headers, AUTHORIZATION.as_str(), &value)?;
        }

        let body = encode_body(&options, &mut headers)?;

        Ok(Self {
            method,
            url,
            headers,
            body,
            options,
        })
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request URL, including the query string.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns `true` if the header is present and, when `value` is given, equal to it.
    #[must_use]
    pub fn has_header(&self, name: &str, value: Option<&str>) -> bool {
        match (self.header(name), value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Set a header, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the name or value is invalid.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        insert_header(&mut self.headers, name, value)?;
        self.options.set_header(name, value);
        Ok(self)
    }

    /// Encoded body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Options this request was built from.
    #[must_use]
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// `Content-Type` is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.contains("json"))
    }

    /// `Content-Type` is form URL-encoded.
    #[must_use]
    pub fn is_form(&self) -> bool {
        self.has_header(CONTENT_TYPE.as_str(), Some(ContentType::FormUrlEncoded.as_str()))
    }

    /// `Content-Type` is multipart.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"))
    }

    /// The request payload as key/value data.
    ///
    /// Decoded from the body for form and JSON requests, taken from the text parts for
    /// multipart requests, and from the query string otherwise.
    #[must_use]
    pub fn data(&self) -> Map<String, Value> {
        if self.is_form() {
            return pairs_to_map(url::form_urlencoded::parse(&self.body).into_owned());
        }
        if self.is_json() {
            return match serde_json::from_slice(&self.body) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
        }
        if self.is_multipart() {
            return self
                .options
                .multipart
                .iter()
                .map(|part| {
                    let value = String::from_utf8_lossy(part.contents()).into_owned();
                    (part.name().to_string(), Value::String(value))
                })
                .collect();
        }
        pairs_to_map(self.url.query_pairs().into_owned())
    }

    /// Consume into (method, url, headers, body, options).
    #[must_use]
    pub fn into_parts(self) -> (Method, Url, HeaderMap, Bytes, RequestOptions) {
        (self.method, self.url, self.headers, self.body, self.options)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::invalid_request(format!("invalid header name '{name}': {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::invalid_request(format!("invalid value for header '{name}': {e}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

fn encode_body(options: &RequestOptions, headers: &mut HeaderMap) -> Result<Bytes> {
    if !options.multipart.is_empty() {
        let (content_type, body) = Form::new()
            .parts_from(options.multipart.iter().cloned())
            .into_body();
        insert_header(headers, CONTENT_TYPE.as_str(), &content_type)?;
        return Ok(body);
    }

    if let Some(form) = &options.form_params {
        let pairs: Vec<(&str, String)> = form
            .iter()
            .flat_map(|(name, value)| match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| (name.as_str(), crate::value_to_field(item)))
                    .collect::<Vec<_>>(),
                other => vec![(name.as_str(), crate::value_to_field(other))],
            })
            .collect();
        default_content_type(headers, ContentType::FormUrlEncoded);
        return crate::to_form(&pairs);
    }

    if let Some(json) = &options.json {
        default_content_type(headers, ContentType::Json);
        return crate::to_json(json);
    }

    Ok(options.body.clone().unwrap_or_default())
}

fn default_content_type(headers: &mut HeaderMap, content_type: ContentType) {
    headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static(content_type.as_str()));
}

fn pairs_to_map(pairs: impl Iterator<Item = (String, String)>) -> Map<String, Value> {
    pairs.map(|(k, v)| (k, Value::String(v))).collect()
}
