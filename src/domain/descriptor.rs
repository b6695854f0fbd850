//! Request descriptors: the cache-relevant projection of a request.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::pages::Page;
use crate::domain::pattern::Tokens;

/// Headers that influence rendered output and therefore the cache key.
pub const DESCRIPTOR_HEADERS: [&str; 2] = ["accept-language", "host"];

/// The parts of an inbound request the page pipeline looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    pub protocol: String,
    /// Host the request was routed to, before any `Host` header fallback.
    pub host: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Whether the caller asked for the page directory to be rebuilt.
    pub invalidate: bool,
}

impl IncomingRequest {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parse a raw query string into params. Later duplicates win.
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if key == "invalidate" {
                    self.invalidate = true;
                }
                self.params.insert(key.into_owned(), value.into_owned());
            }
        }
        self
    }

    /// Keep only allow-listed headers, keyed by lowercase name.
    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            if DESCRIPTOR_HEADERS.contains(&name.as_str()) {
                self.headers.insert(name, value.to_string());
            }
        }
        self
    }

    /// Host used for URLs: a `localhost` route host defers to the `Host` header.
    pub fn effective_host(&self) -> &str {
        if self.host == "localhost"
            && let Some(header) = self.headers.get("host")
        {
            return header;
        }
        &self.host
    }
}

/// Everything that determines the output of a page render.
///
/// Two requests with equal descriptors are served the same cached bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub url: String,
    pub host: String,
    pub protocol: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub matching_tokens: Tokens,
    pub matching_path: String,
    pub matching_url: String,
    pub matching_page_id: String,
    pub matching_page_title: String,
}

impl RequestDescriptor {
    pub fn new(request: &IncomingRequest, matching_path: &str, tokens: &Tokens, page: &Page) -> Self {
        let host = request.effective_host().to_string();
        let protocol = request.protocol.clone();
        Self {
            url: format!("{protocol}://{host}{}", request.path),
            matching_url: format!("{protocol}://{host}{matching_path}"),
            host,
            protocol,
            path: request.path.clone(),
            params: request.params.clone(),
            headers: request.headers.clone(),
            matching_tokens: tokens.clone(),
            matching_path: matching_path.to_string(),
            matching_page_id: page.id.clone(),
            matching_page_title: page.display_title().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn page() -> Page {
        Page {
            id: "p1".into(),
            title: None,
            uris: vec!["/blog/{slug}".into()],
            template_path: "t/blog.html".into(),
            fields: Map::new(),
        }
    }

    #[test]
    fn only_allow_listed_headers_are_kept() {
        let request = IncomingRequest::new("http", "example.com", "/").with_headers([
            ("Accept-Language", "en"),
            ("Cookie", "secret"),
            ("Host", "example.com"),
        ]);
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.headers.get("accept-language").map(String::as_str), Some("en"));
        assert!(!request.headers.contains_key("cookie"));
    }

    #[test]
    fn query_is_decoded_and_flags_invalidate() {
        let request = IncomingRequest::new("http", "h", "/").with_query(Some("q=a%20b&invalidate"));
        assert_eq!(request.params.get("q").map(String::as_str), Some("a b"));
        assert!(request.invalidate);

        let request = IncomingRequest::new("http", "h", "/").with_query(Some("q=1"));
        assert!(!request.invalidate);
    }

    #[test]
    fn localhost_defers_to_host_header() {
        let request = IncomingRequest::new("http", "localhost", "/blog/x")
            .with_headers([("host", "localhost:3000")]);
        let mut tokens = Tokens::new();
        tokens.insert("slug".into(), "x".into());

        let descriptor = RequestDescriptor::new(&request, "/blog/{slug}", &tokens, &page());
        assert_eq!(descriptor.host, "localhost:3000");
        assert_eq!(descriptor.url, "http://localhost:3000/blog/x");
        assert_eq!(descriptor.matching_url, "http://localhost:3000/blog/{slug}");
        assert_eq!(descriptor.matching_page_title, "p1");
    }

    #[test]
    fn other_hosts_ignore_host_header() {
        let request =
            IncomingRequest::new("https", "example.com", "/").with_headers([("host", "other")]);
        assert_eq!(request.effective_host(), "example.com");
    }
}
