//! Bidirectional codec between Riak's flat `x-riak-*` headers and [`Metadata`].
//!
//! Encoding collapses the `vclock`, `index` and `meta` namespaces under the single
//! `x-riak` wire prefix:
//!
//! | Structured | Header |
//! | --- | --- |
//! | `vclock = "a85h..."` | `x-riak-vclock: a85h...` |
//! | `meta["colour_hint"] = "red"` | `x-riak-meta-colour-hint: red` |
//! | `index["email"] = Bin(["a", "b"])` | `x-riak-index-email_bin: a, b` |
//! | `index["age"] = Int([42])` | `x-riak-index-age_int: 42` |
//! | `fields["content_type"]` | `content-type` |
//!
//! Decoding reverses the table. Keys are lower-cased, transport housekeeping headers
//! are dropped first, and `-` in plain header names becomes `_`. Round-tripping is
//! lossless for the reserved namespaces and for fields/meta keys spelled with `_`,
//! except that an index with no values is not sent and so does not come back.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub const RIAK_HEADER_PREFIX: &str = "x-riak-";
const VCLOCK_HEADER: &str = "x-riak-vclock";
const META_SEGMENT: &str = "meta-";
const INDEX_SEGMENT: &str = "index-";
const VALUE_SEPARATOR: &str = ", ";

/// Headers removed before decoding; they describe the transfer, not the object.
pub const DEFAULT_IGNORED_HEADERS: [&str; 4] = ["date", "content-length", "server", "vary"];

/// Values of one secondary index. The variant decides the `_bin`/`_int` wire suffix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum IndexValues {
    Bin(Vec<String>),
    Int(Vec<i64>),
}

impl IndexValues {
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Bin(_) => "bin",
            Self::Int(_) => "int",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bin(values) => values.is_empty(),
            Self::Int(values) => values.is_empty(),
        }
    }

    fn join(&self) -> String {
        match self {
            Self::Bin(values) => values.join(VALUE_SEPARATOR),
            Self::Int(values) => values
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(VALUE_SEPARATOR),
        }
    }

    fn parse(suffix: Option<&str>, value: &str) -> Self {
        let parts = value.split(VALUE_SEPARATOR);
        if suffix == Some("int") {
            let parsed: Result<Vec<i64>, _> = parts.clone().map(|part| part.trim().parse()).collect();
            if let Ok(values) = parsed {
                return Self::Int(values);
            }
        }
        Self::Bin(parts.map(str::to_string).collect())
    }
}

impl From<Vec<String>> for IndexValues {
    fn from(values: Vec<String>) -> Self {
        Self::Bin(values)
    }
}

impl From<Vec<&str>> for IndexValues {
    fn from(values: Vec<&str>) -> Self {
        Self::Bin(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i64>> for IndexValues {
    fn from(values: Vec<i64>) -> Self {
        Self::Int(values)
    }
}

/// Structured view of an object's headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Opaque causal token; round-tripped untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub index: BTreeMap<String, IndexValues>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    /// Scalar top-level fields such as `content_type`, `status_code`, `last_modified`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vclock(mut self, vclock: impl Into<String>) -> Self {
        self.vclock = Some(vclock.into());
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, values: impl Into<IndexValues>) -> Self {
        self.index.insert(name.into(), values.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_field("content_type", content_type)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.field("content_type")
    }

    pub fn status_code(&self) -> Option<u16> {
        self.field("status_code")?.trim().parse().ok()
    }

    pub fn location(&self) -> Option<&str> {
        self.field("location")
    }

    pub fn etag(&self) -> Option<&str> {
        self.field("etag")
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.field("transfer_encoding")
    }

    pub fn is_chunked(&self) -> bool {
        self.transfer_encoding()
            .is_some_and(|value| value.eq_ignore_ascii_case("chunked"))
    }

    /// `Last-Modified` as an HTTP date. Unparseable values read as absent.
    pub fn last_modified(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc2822(self.field("last_modified")?.trim()).ok()
    }

    /// The subset worth sending back on a write: reserved namespaces, content type
    /// and links. Response-only fields (status, etag, dates, transfer details) are
    /// dropped.
    pub fn writable(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|(name, _)| matches!(name.as_str(), "content_type" | "link"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            vclock: self.vclock.clone(),
            index: self.index.clone(),
            meta: self.meta.clone(),
            fields,
        }
    }

    /// Flatten into wire headers. Keys are lower-case.
    pub fn to_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();

        for (name, value) in &self.fields {
            headers.insert(name.to_ascii_lowercase().replace('_', "-"), value.clone());
        }

        if let Some(vclock) = &self.vclock {
            headers.insert(VCLOCK_HEADER.to_string(), vclock.clone());
        }

        for (key, value) in &self.meta {
            headers.insert(
                format!(
                    "{RIAK_HEADER_PREFIX}{META_SEGMENT}{}",
                    key.to_ascii_lowercase().replace('_', "-")
                ),
                value.clone(),
            );
        }

        for (name, values) in &self.index {
            if values.is_empty() {
                continue;
            }
            headers.insert(
                format!(
                    "{RIAK_HEADER_PREFIX}{INDEX_SEGMENT}{}_{}",
                    name.to_ascii_lowercase(),
                    values.suffix()
                ),
                values.join(),
            );
        }

        headers
    }

    /// Build metadata from response headers, skipping `ignored` names
    /// (compared case-insensitively).
    pub fn from_headers<I, K, V>(headers: I, ignored: &[String]) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut metadata = Self::default();

        for (key, value) in headers {
            let key = key.as_ref().to_ascii_lowercase();
            if ignored.iter().any(|name| name.eq_ignore_ascii_case(&key)) {
                continue;
            }
            let value = value.into();

            let Some(rest) = key.strip_prefix(RIAK_HEADER_PREFIX) else {
                metadata.fields.insert(key.replace('-', "_"), value);
                continue;
            };

            if rest == "vclock" {
                metadata.vclock = Some(value);
            } else if let Some(name) = rest.strip_prefix(META_SEGMENT) {
                metadata.meta.insert(name.replace('-', "_"), value);
            } else if let Some(name) = rest.strip_prefix(INDEX_SEGMENT) {
                let (name, suffix) = split_index_suffix(name);
                metadata
                    .index
                    .insert(name.to_string(), IndexValues::parse(suffix, &value));
            } else {
                metadata.fields.insert(key.replace('-', "_"), value);
            }
        }

        metadata
    }
}

/// The default ignore list as owned strings, for config defaults.
pub fn default_ignored_headers() -> Vec<String> {
    DEFAULT_IGNORED_HEADERS.iter().map(|name| name.to_string()).collect()
}

fn split_index_suffix(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('_') {
        Some((base, suffix @ ("bin" | "int"))) if !base.is_empty() => (base, Some(suffix)),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_ignores() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn string_index_encodes_with_bin_suffix() {
        let metadata = Metadata::new().with_index("foo", vec!["a", "b"]);
        let headers = metadata.to_headers();

        assert_eq!(
            headers.get("x-riak-index-foo_bin").map(String::as_str),
            Some("a, b")
        );
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn bin_index_header_decodes_to_values() {
        let metadata = Metadata::from_headers([("X-Riak-Index-Foo_bin", "a, b")], &no_ignores());

        assert_eq!(
            metadata.index.get("foo"),
            Some(&IndexValues::Bin(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn int_index_round_trips_and_keeps_underscored_names() {
        let metadata = Metadata::new()
            .with_index("birth_year", vec![1815_i64, 1852])
            .with_index("email_address", vec!["ada@example.com"]);
        let headers = metadata.to_headers();

        assert_eq!(
            headers.get("x-riak-index-birth_year_int").map(String::as_str),
            Some("1815, 1852")
        );
        assert!(headers.contains_key("x-riak-index-email_address_bin"));
        assert_eq!(Metadata::from_headers(headers, &no_ignores()), metadata);
    }

    #[test]
    fn malformed_int_index_falls_back_to_strings() {
        let metadata = Metadata::from_headers([("x-riak-index-age_int", "12, old")], &no_ignores());
        assert_eq!(
            metadata.index.get("age"),
            Some(&IndexValues::Bin(vec!["12".to_string(), "old".to_string()]))
        );
    }

    #[test]
    fn reserved_namespaces_round_trip() {
        let metadata = Metadata::new()
            .with_vclock("a85hYGBgzGDKBVIcypz/fgaUHjmdwZTImMfKkD1z+Tm+LAA=")
            .with_index("tags", vec!["red", "green", "blue"])
            .with_index("score", vec![-3_i64, 0, 99])
            .with_meta("author", "ada")
            .with_meta("colour_hint", "teal")
            .with_content_type("application/json")
            .with_field("last_modified", "Tue, 15 Nov 1994 08:12:31 GMT")
            .with_field("location", "/buckets/b/keys/k");

        let decoded = Metadata::from_headers(metadata.to_headers(), &no_ignores());
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn empty_index_is_not_sent() {
        let metadata = Metadata::new()
            .with_index("tags", IndexValues::Bin(Vec::new()))
            .with_index("email", vec!["ada@example.com"]);

        let headers = metadata.to_headers();
        assert!(!headers.keys().any(|name| name.starts_with("x-riak-index-tags")));

        let decoded = Metadata::from_headers(headers, &no_ignores());
        assert!(!decoded.index.contains_key("tags"));
        assert!(decoded.index.contains_key("email"));
    }

    #[test]
    fn meta_leaf_underscores_become_dashes() {
        let headers = Metadata::new().with_meta("colour_hint", "teal").to_headers();
        assert_eq!(
            headers.get("x-riak-meta-colour-hint").map(String::as_str),
            Some("teal")
        );
    }

    #[test]
    fn decode_lowercases_and_filters_transport_noise() {
        let headers = vec![
            ("Date", "Tue, 15 Nov 1994 08:12:31 GMT"),
            ("Content-Length", "12"),
            ("Server", "MochiWeb/1.1 WebMachine/1.10.0"),
            ("Vary", "Accept-Encoding"),
            ("Content-Type", "application/json"),
            ("X-Riak-Vclock", "abc="),
            ("X-Riak-Meta-Author", "ada"),
            ("Last-Modified", "Wed, 16 Nov 1994 08:12:31 GMT"),
            ("status-code", "200"),
        ];
        let metadata = Metadata::from_headers(headers, &default_ignored_headers());

        assert_eq!(metadata.content_type(), Some("application/json"));
        assert_eq!(metadata.vclock.as_deref(), Some("abc="));
        assert_eq!(metadata.meta.get("author").map(String::as_str), Some("ada"));
        assert_eq!(metadata.status_code(), Some(200));
        assert!(metadata.last_modified().is_some());
        assert!(!metadata.fields.contains_key("date"));
        assert!(!metadata.fields.contains_key("content_length"));
        assert!(!metadata.fields.contains_key("server"));
        assert!(!metadata.fields.contains_key("vary"));
    }

    #[test]
    fn unknown_riak_headers_keep_their_prefix() {
        let metadata = Metadata::from_headers([("X-Riak-Deleted", "true")], &no_ignores());
        assert_eq!(metadata.field("x_riak_deleted"), Some("true"));
        assert_eq!(
            metadata.to_headers().get("x-riak-deleted").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn writable_drops_response_only_fields() {
        let metadata = Metadata::new()
            .with_vclock("abc=")
            .with_meta("author", "ada")
            .with_content_type("text/plain")
            .with_field("etag", "\"3pB8\"")
            .with_field("status_code", "200")
            .with_field("transfer_encoding", "chunked");

        let writable = metadata.writable();
        assert_eq!(writable.vclock.as_deref(), Some("abc="));
        assert_eq!(writable.content_type(), Some("text/plain"));
        assert_eq!(writable.fields.len(), 1);
        assert_eq!(writable.meta.len(), 1);
    }

    #[test]
    fn unparseable_last_modified_reads_as_absent() {
        let metadata = Metadata::new().with_field("last_modified", "yesterday");
        assert!(metadata.last_modified().is_none());
    }
}
