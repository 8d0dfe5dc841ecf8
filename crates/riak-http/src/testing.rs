//! In-memory Riak node for tests.
//!
//! [`MockRiak`] implements [`Transport`] over the default resource layout
//! (`/ping`, `/stats`, `/buckets`, `/solr`). It stores objects with their
//! siblings, bucket properties and every request it receives. Scripted responses
//! and one-shot transport failures take priority over the built-in routes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value, json};

use crate::error::TransportError;
use crate::metadata::{IndexValues, Metadata};
use crate::mime::{APPLICATION_JSON, TEXT_PLAIN};
use crate::transport::{Transport, WireRequest, WireResponse};
use crate::types::Method;

/// 1994-11-15T08:12:31Z; the mock clock advances one second per write.
const MOCK_EPOCH_SECS: i64 = 784_887_151;
const KEYS_PER_STREAM_BATCH: usize = 2;

/// A request as the mock received it.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path without the query string.
    pub fn resource(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }

    /// Decoded value of a query-string option.
    pub fn option(&self, name: &str) -> Option<String> {
        parse_options(&self.path).remove(name)
    }
}

/// Canned response for one scripted request.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,
}

impl ScriptedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::new(status)
            .with_header("content-type", TEXT_PLAIN)
            .with_header("content-length", body.len().to_string())
            .with_body(body.to_string())
    }

    pub fn json(status: u16, body: &Value) -> Self {
        let body = body.to_string();
        Self::new(status)
            .with_header("content-type", APPLICATION_JSON)
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Append one body chunk.
    pub fn with_chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        self.with_chunk(body)
    }

    /// Deliver `chunks` with `transfer-encoding: chunked`.
    pub fn chunked<I, C>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        self.chunks.extend(chunks.into_iter().map(Into::into));
        self.with_header("transfer-encoding", "chunked")
    }

    fn into_wire(self) -> WireResponse {
        WireResponse {
            status: self.status,
            headers: self.headers,
            body: stream::iter(self.chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct MockSibling {
    vtag: String,
    body: Bytes,
    metadata: Metadata,
    last_modified: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct MockObject {
    vclock: u64,
    siblings: Vec<MockSibling>,
}

#[derive(Debug, Default)]
struct MockRiakState {
    objects: BTreeMap<String, BTreeMap<String, MockObject>>,
    props: BTreeMap<String, Map<String, Value>>,
    requests: Vec<RecordedRequest>,
    scripted: VecDeque<(Method, String, ScriptedResponse)>,
    failures: VecDeque<(String, TransportError)>,
    next_key: u64,
    next_vtag: u64,
    tick: i64,
}

impl MockRiakState {
    fn allocate_key(&mut self) -> String {
        self.next_key += 1;
        format!("mockkey{}", self.next_key)
    }

    fn allocate_vtag(&mut self) -> String {
        self.next_vtag += 1;
        format!("vtag{}", self.next_vtag)
    }

    fn now(&mut self) -> Option<String> {
        self.tick += 1;
        http_date(MOCK_EPOCH_SECS + self.tick)
    }

    fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter(|(_, objects)| !objects.is_empty())
            .map(|(name, _)| name.clone())
            .chain(self.props.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn bucket_props(&self, bucket: &str) -> Value {
        let mut props = Map::new();
        props.insert("name".to_string(), json!(bucket));
        props.insert("n_val".to_string(), json!(3));
        props.insert("allow_mult".to_string(), json!(false));
        if let Some(stored) = self.props.get(bucket) {
            for (key, value) in stored {
                props.insert(key.clone(), value.clone());
            }
        }
        Value::Object(props)
    }

    fn store(&mut self, bucket: &str, key: &str, request: &WireRequest) {
        let stored = Metadata::from_headers(request.headers.iter().cloned(), &[]);
        let metadata = Metadata {
            vclock: None,
            ..stored.writable()
        };
        let sibling = MockSibling {
            vtag: self.allocate_vtag(),
            body: request.body.clone(),
            metadata,
            last_modified: self.now(),
        };
        let object = self
            .objects
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        object.vclock += 1;
        object.siblings = vec![sibling];
    }

    fn object_response(&self, bucket: &str, key: &str, vtag: Option<&str>) -> ScriptedResponse {
        let Some(object) = self.objects.get(bucket).and_then(|objects| objects.get(key)) else {
            return not_found();
        };

        let sibling = match vtag {
            Some(vtag) => object.siblings.iter().find(|sibling| sibling.vtag == vtag),
            None if object.siblings.len() > 1 => {
                let mut listing = String::from("Siblings:\n");
                for sibling in &object.siblings {
                    listing.push_str(&sibling.vtag);
                    listing.push('\n');
                }
                return with_noise(
                    ScriptedResponse::text(300, &listing)
                        .with_header("x-riak-vclock", vclock_token(object.vclock)),
                );
            }
            None => object.siblings.first(),
        };
        let Some(sibling) = sibling else {
            return not_found();
        };

        let mut response = ScriptedResponse::new(200)
            .with_header("x-riak-vclock", vclock_token(object.vclock))
            .with_header("etag", format!("\"{}\"", sibling.vtag))
            .with_header("content-length", sibling.body.len().to_string());
        for (name, value) in sibling.metadata.to_headers() {
            response = response.with_header(&name, value);
        }
        if let Some(last_modified) = &sibling.last_modified {
            response = response.with_header("last-modified", last_modified.clone());
        }
        with_noise(response.with_body(sibling.body.clone()))
    }

    fn index_matches(&self, bucket: &str, index: &str, start: &str, end: &str) -> Vec<String> {
        let Some(objects) = self.objects.get(bucket) else {
            return Vec::new();
        };
        objects
            .iter()
            .filter(|(key, object)| {
                if index == "$key" {
                    return key.as_str() >= start && key.as_str() <= end;
                }
                let Some((name, _)) = index.rsplit_once('_') else {
                    return false;
                };
                object.siblings.iter().any(|sibling| {
                    match sibling.metadata.index.get(name) {
                        Some(IndexValues::Bin(values)) => values
                            .iter()
                            .any(|value| value.as_str() >= start && value.as_str() <= end),
                        Some(IndexValues::Int(values)) => {
                            match (start.parse::<i64>(), end.parse::<i64>()) {
                                (Ok(start), Ok(end)) => {
                                    values.iter().any(|value| *value >= start && *value <= end)
                                }
                                _ => false,
                            }
                        }
                        None => false,
                    }
                })
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn solr_docs(&self, bucket: &str, q: &str) -> Vec<Value> {
        let Some(objects) = self.objects.get(bucket) else {
            return Vec::new();
        };
        let (field, expected) = q.split_once(':').unwrap_or(("*", "*"));
        objects
            .iter()
            .filter(|(_, object)| {
                if field == "*" {
                    return true;
                }
                object.siblings.iter().any(|sibling| {
                    serde_json::from_slice::<Value>(&sibling.body)
                        .ok()
                        .and_then(|doc| doc.get(field).cloned())
                        .is_some_and(|value| match value {
                            Value::String(text) => text == expected,
                            other => other.to_string() == expected,
                        })
                })
            })
            .map(|(key, _)| json!({"id": key}))
            .collect()
    }
}

/// In-memory [`Transport`] that behaves like a single Riak node.
#[derive(Clone, Debug, Default)]
pub struct MockRiak {
    inner: Arc<Mutex<MockRiakState>>,
}

impl MockRiak {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockRiakState>, TransportError> {
        self.inner
            .lock()
            .map_err(|_| TransportError::Request("mock riak mutex poisoned".to_string()))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockRiakState) -> T) -> T {
        let mut state = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Answer the next `method path` request (path includes the query string) with
    /// `response`. Scripts are consumed in order.
    pub fn script(&self, method: Method, path: &str, response: ScriptedResponse) {
        self.with_state(|state| {
            state
                .scripted
                .push_back((method, path.to_string(), response))
        });
    }

    /// Fail the next request to `path` at the transport level.
    pub fn fail_path(&self, path: &str, error: TransportError) {
        self.with_state(|state| state.failures.push_back((path.to_string(), error)));
    }

    /// Store a single-version object.
    pub fn put_object(&self, bucket: &str, key: &str, body: impl Into<Bytes>, content_type: &str) {
        self.with_state(|state| {
            let sibling = MockSibling {
                vtag: state.allocate_vtag(),
                body: body.into(),
                metadata: Metadata::new().with_content_type(content_type),
                last_modified: state.now(),
            };
            let object = state
                .objects
                .entry(bucket.to_string())
                .or_default()
                .entry(key.to_string())
                .or_default();
            object.vclock += 1;
            object.siblings = vec![sibling];
        });
    }

    /// Add a `text/plain` sibling to a key. `last_modified` is sent verbatim; `None`
    /// omits the header.
    pub fn add_sibling(
        &self,
        bucket: &str,
        key: &str,
        vtag: &str,
        body: impl Into<Bytes>,
        last_modified: Option<&str>,
    ) {
        self.with_state(|state| {
            let object = state
                .objects
                .entry(bucket.to_string())
                .or_default()
                .entry(key.to_string())
                .or_default();
            object.vclock += 1;
            object.siblings.push(MockSibling {
                vtag: vtag.to_string(),
                body: body.into(),
                metadata: Metadata::new().with_content_type(TEXT_PLAIN),
                last_modified: last_modified.map(str::to_string),
            });
        });
    }

    /// Stored versions of a key as `(vtag, body)` pairs.
    pub fn versions(&self, bucket: &str, key: &str) -> Vec<(String, Bytes)> {
        self.with_state(|state| {
            state
                .objects
                .get(bucket)
                .and_then(|objects| objects.get(key))
                .map(|object| {
                    object
                        .siblings
                        .iter()
                        .map(|sibling| (sibling.vtag.clone(), sibling.body.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with_state(|state| state.requests.clone())
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.with_state(|state| state.requests.last().cloned())
    }

    /// Requests whose resource (path without query string) equals `resource`.
    pub fn requests_to(&self, method: Method, resource: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method && request.resource() == resource)
            .collect()
    }

    fn route(state: &mut MockRiakState, request: &WireRequest) -> ScriptedResponse {
        let resource = request.path.split('?').next().unwrap_or_default();
        let options = parse_options(&request.path);
        let segments: Vec<String> = resource
            .trim_start_matches('/')
            .split('/')
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, [""]) => ScriptedResponse::json(
                200,
                &json!({
                    "riak_kv_wm_buckets": "/riak",
                    "riak_kv_wm_index": "/buckets",
                    "riak_kv_wm_ping": "/ping",
                    "riak_kv_wm_stats": "/stats",
                    "riak_solr_searcher_wm": "/solr",
                }),
            ),
            (Method::Get, ["ping"]) => with_noise(ScriptedResponse::text(200, "OK")),
            (Method::Get, ["stats"]) => {
                let keys: usize = state.objects.values().map(BTreeMap::len).sum();
                ScriptedResponse::json(
                    200,
                    &json!({"nodename": "riak@127.0.0.1", "vnode_gets": state.requests.len(), "mock_keys": keys}),
                )
            }
            (Method::Get, ["buckets"]) => {
                ScriptedResponse::json(200, &json!({"buckets": state.bucket_names()}))
            }
            (Method::Get, ["buckets", bucket, "props"]) => {
                ScriptedResponse::json(200, &json!({"props": state.bucket_props(bucket)}))
            }
            (Method::Put, ["buckets", bucket, "props"]) => {
                let Some(Value::Object(props)) = serde_json::from_slice::<Value>(&request.body)
                    .ok()
                    .and_then(|body| body.get("props").cloned())
                else {
                    return ScriptedResponse::text(400, "bad props");
                };
                let stored = state.props.entry(bucket.to_string()).or_default();
                for (key, value) in props {
                    stored.insert(key, value);
                }
                ScriptedResponse::new(204)
            }
            (Method::Get, ["buckets", bucket, "keys", ""]) => {
                let keys = state.keys(bucket);
                match options.get("keys").map(String::as_str) {
                    Some("stream") => stream_keys(&keys),
                    Some("true") => ScriptedResponse::json(200, &json!({"keys": keys})),
                    _ => ScriptedResponse::text(400, "keys option required"),
                }
            }
            (Method::Post, ["buckets", bucket, "keys"]) => {
                let key = state.allocate_key();
                state.store(bucket, &key, request);
                ScriptedResponse::new(201)
                    .with_header("location", format!("/buckets/{bucket}/keys/{key}"))
            }
            (Method::Get, ["buckets", bucket, "keys", key]) => {
                state.object_response(bucket, key, options.get("vtag").map(String::as_str))
            }
            (Method::Head, ["buckets", bucket, "keys", key]) => {
                let mut response =
                    state.object_response(bucket, key, options.get("vtag").map(String::as_str));
                response.chunks.clear();
                response
            }
            (Method::Put, ["buckets", bucket, "keys", key]) => {
                state.store(bucket, key, request);
                if options.get("returnbody").is_some_and(|value| value == "true") {
                    state.object_response(bucket, key, None)
                } else {
                    ScriptedResponse::new(204)
                }
            }
            (Method::Delete, ["buckets", bucket, "keys", key]) => {
                let removed = state
                    .objects
                    .get_mut(*bucket)
                    .and_then(|objects| objects.remove(*key));
                match removed {
                    Some(_) => ScriptedResponse::new(204),
                    None => not_found(),
                }
            }
            (Method::Get, ["buckets", bucket, "index", index, value]) => {
                let keys = state.index_matches(bucket, index, value, value);
                ScriptedResponse::json(200, &json!({"keys": keys}))
            }
            (Method::Get, ["buckets", bucket, "index", index, start, end]) => {
                let keys = state.index_matches(bucket, index, start, end);
                ScriptedResponse::json(200, &json!({"keys": keys}))
            }
            (Method::Get, ["solr", bucket, "select", ""]) => {
                let q = options.get("q").map(String::as_str).unwrap_or("*:*");
                let docs = state.solr_docs(bucket, q);
                ScriptedResponse::json(
                    200,
                    &json!({"response": {"numFound": docs.len(), "start": 0, "docs": docs}}),
                )
            }
            _ => ScriptedResponse::text(400, "unsupported mock route"),
        }
    }
}

#[async_trait]
impl Transport for MockRiak {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let mut state = self.lock()?;
        state.requests.push(RecordedRequest {
            method: request.method,
            path: request.path.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        if let Some(position) = state
            .failures
            .iter()
            .position(|(path, _)| *path == request.path)
        {
            if let Some((_, error)) = state.failures.remove(position) {
                return Err(error);
            }
        }

        if let Some(position) = state
            .scripted
            .iter()
            .position(|(method, path, _)| *method == request.method && *path == request.path)
        {
            if let Some((_, _, response)) = state.scripted.remove(position) {
                return Ok(response.into_wire());
            }
        }

        Ok(Self::route(&mut state, &request).into_wire())
    }
}

fn parse_options(path: &str) -> BTreeMap<String, String> {
    let Some((_, query)) = path.split_once('?') else {
        return BTreeMap::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                key.to_string(),
                percent_decode_str(value).decode_utf8_lossy().into_owned(),
            )
        })
        .collect()
}

fn http_date(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|time| time.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

fn vclock_token(counter: u64) -> String {
    format!("a85hYGBgzGDKBVIc{counter:04}")
}

fn not_found() -> ScriptedResponse {
    with_noise(ScriptedResponse::text(404, "not found\n"))
}

/// Housekeeping headers a real node sends on every response.
fn with_noise(response: ScriptedResponse) -> ScriptedResponse {
    response
        .with_header("server", "MochiWeb/1.1 WebMachine/1.10.0 (never breaks eye contact)")
        .with_header("date", "Tue, 15 Nov 1994 08:12:31 GMT")
        .with_header("vary", "Accept-Encoding")
}

/// `{"keys":[...]}` objects of a few keys each, every object split mid-way across
/// two chunks, closed by an empty batch.
fn stream_keys(keys: &[String]) -> ScriptedResponse {
    let mut chunks: Vec<Bytes> = Vec::new();
    for batch in keys.chunks(KEYS_PER_STREAM_BATCH) {
        let mut head = Bytes::from(json!({"keys": batch}).to_string());
        let tail = head.split_off(head.len() / 2);
        chunks.push(head);
        chunks.push(tail);
    }
    chunks.push(Bytes::from_static(br#"{"keys":[]}"#));
    ScriptedResponse::new(200)
        .with_header("content-type", APPLICATION_JSON)
        .chunked(chunks)
}
