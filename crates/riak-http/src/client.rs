//! Request dispatch: query → wire request → structured response.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, trace, warn};

use crate::buckets::Buckets;
use crate::config::ClientConfig;
use crate::error::{RiakError, RiakResult};
use crate::metadata::Metadata;
use crate::mime::{MimeCodec, MimeRegistry};
use crate::objects::Objects;
use crate::transport::{ReqwestTransport, Transport, WireRequest, WireResponse};
use crate::types::{Method, Payload, Query, Response};

/// Fragments of a chunked response, in arrival order.
pub type FragmentStream = BoxStream<'static, RiakResult<Response>>;

/// Outcome of [`Client::request`].
pub enum Dispatch {
    /// Buffered, status-classified and decoded.
    Complete(Response),
    /// Chunked transfer: each fragment is a raw `Response` sharing the same metadata.
    Streaming {
        status: u16,
        metadata: Metadata,
        fragments: FragmentStream,
    },
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            Self::Streaming {
                status, metadata, ..
            } => f
                .debug_struct("Streaming")
                .field("status", status)
                .field("metadata", metadata)
                .finish_non_exhaustive(),
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    mime: MimeRegistry,
}

/// Riak HTTP client. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("mime", &self.inner.mime)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn Transport>>,
    mime: Option<MimeRegistry>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.base_url = base_url.into();
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add a codec on top of the default JSON/text/HTML set.
    pub fn codec(mut self, content_type: &str, codec: Arc<dyn MimeCodec>) -> Self {
        self.mime
            .get_or_insert_with(MimeRegistry::default)
            .register(content_type, codec);
        self
    }

    pub fn mime_registry(mut self, registry: MimeRegistry) -> Self {
        self.mime = Some(registry);
        self
    }

    pub fn build(self) -> RiakResult<Client> {
        let config = self.config.unwrap_or_default();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(&config)?),
        };
        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                transport,
                mime: self.mime.unwrap_or_default(),
            }),
        })
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client over reqwest for `config.base_url`.
    pub fn new(config: ClientConfig) -> RiakResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn from_env() -> RiakResult<Self> {
        Self::new(ClientConfig::from_env())
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                mime: MimeRegistry::default(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn mime(&self) -> &MimeRegistry {
        &self.inner.mime
    }

    pub fn buckets(&self) -> Buckets {
        Buckets::new(self.clone())
    }

    pub fn objects(&self) -> Objects {
        Objects::new(self.clone())
    }

    /// `GET /ping`; a healthy node answers `OK` as text.
    pub async fn ping(&self) -> RiakResult<Payload> {
        let query = Query::new(self.inner.config.resources.ping.clone());
        Ok(self.get(query).await?.data)
    }

    pub async fn stats(&self) -> RiakResult<Payload> {
        let query = Query::new(self.inner.config.resources.stats.clone());
        Ok(self.get(query).await?.data)
    }

    /// `GET /`: the node's resource listing.
    pub async fn resources(&self) -> RiakResult<Payload> {
        Ok(self.get(Query::new("")).await?.data)
    }

    /// Dispatch one query.
    ///
    /// Default `content-type`/`accept` headers are added when the query's metadata
    /// lacks them, the body is encoded for the outgoing content type, and the
    /// response is either buffered into [`Dispatch::Complete`] or, for chunked
    /// transfers, handed back fragment by fragment in [`Dispatch::Streaming`].
    pub async fn request(&self, method: Method, query: Query) -> RiakResult<Dispatch> {
        let mut headers = query.metadata.to_headers();
        for (name, value) in &self.inner.config.default_headers {
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.clone());
        }

        let path = query.path();
        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let body = self.inner.mime.encode(&content_type, &query.body)?;

        debug!(%method, %path, body_bytes = body.len(), "dispatching riak request");
        let wire = WireRequest {
            method,
            path: path.clone(),
            headers: headers.into_iter().collect(),
            body,
        };

        match self.inner.transport.send(wire).await {
            Ok(response) => self.handle_response(method, path, query, response).await,
            Err(source) => {
                warn!(%method, %path, error = %source, "riak transport failure");
                Err(RiakError::Network {
                    method,
                    path,
                    query: Box::new(query),
                    source,
                })
            }
        }
    }

    pub async fn head(&self, query: Query) -> RiakResult<Response> {
        self.send(Method::Head, query).await
    }

    pub async fn get(&self, query: Query) -> RiakResult<Response> {
        self.send(Method::Get, query).await
    }

    pub async fn post(&self, query: Query) -> RiakResult<Response> {
        self.send(Method::Post, query).await
    }

    pub async fn put(&self, query: Query) -> RiakResult<Response> {
        self.send(Method::Put, query).await
    }

    /// `DELETE`, with a 404 reported as success: deleting a missing key is a no-op.
    pub async fn delete(&self, query: Query) -> RiakResult<Response> {
        match self.send(Method::Delete, query).await {
            Err(RiakError::Http {
                status: 404,
                body,
                metadata,
            }) => Ok(Response {
                data: if body.is_empty() {
                    Payload::Empty
                } else {
                    Payload::Text(body)
                },
                metadata: *metadata,
                status: 404,
            }),
            other => other,
        }
    }

    /// [`Client::request`] collapsed to one response. Chunked bodies are collected
    /// and then classified and decoded like buffered ones.
    pub async fn send(&self, method: Method, query: Query) -> RiakResult<Response> {
        match self.request(method, query).await? {
            Dispatch::Complete(response) => Ok(response),
            Dispatch::Streaming {
                status,
                metadata,
                mut fragments,
            } => {
                let mut buffer = BytesMut::new();
                while let Some(fragment) = fragments.next().await {
                    buffer.extend_from_slice(&fragment?.data.to_bytes());
                }
                let content_type = metadata.content_type().map(str::to_string);
                self.finish(status, content_type.as_deref(), None, buffer.freeze(), metadata)
            }
        }
    }

    async fn handle_response(
        &self,
        method: Method,
        path: String,
        query: Query,
        response: WireResponse,
    ) -> RiakResult<Dispatch> {
        let chunked = response.is_chunked();
        let declared_length = response
            .header("content-length")
            .and_then(|value| value.trim().parse::<usize>().ok());
        let content_type = response.header("content-type").map(str::to_string);

        let WireResponse {
            status,
            mut headers,
            mut body,
        } = response;
        headers.push(("status-code".to_string(), status.to_string()));
        let metadata = Metadata::from_headers(headers, &self.inner.config.ignore_headers);
        debug!(%method, %path, status, chunked, "riak response received");

        if chunked {
            let fragment_metadata = metadata.clone();
            let query = Arc::new(query);
            let fragments = body
                .map(move |chunk| match chunk {
                    Ok(bytes) => {
                        trace!(bytes = bytes.len(), "riak response fragment");
                        Ok(Response {
                            data: Payload::Raw(bytes),
                            metadata: fragment_metadata.clone(),
                            status,
                        })
                    }
                    Err(source) => Err(RiakError::Network {
                        method,
                        path: path.clone(),
                        query: Box::new(query.as_ref().clone()),
                        source,
                    }),
                })
                .boxed();
            return Ok(Dispatch::Streaming {
                status,
                metadata,
                fragments,
            });
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(source) => {
                    return Err(RiakError::Network {
                        method,
                        path,
                        query: Box::new(query),
                        source,
                    });
                }
            }
        }
        let mut raw = buffer.freeze();
        if let Some(length) = declared_length
            && raw.len() > length
        {
            raw.truncate(length);
        }

        self.finish(status, content_type.as_deref(), declared_length, raw, metadata)
            .map(Dispatch::Complete)
    }

    fn finish(
        &self,
        status: u16,
        content_type: Option<&str>,
        declared_length: Option<usize>,
        raw: Bytes,
        metadata: Metadata,
    ) -> RiakResult<Response> {
        if status >= 400 {
            return Err(RiakError::Http {
                status,
                body: String::from_utf8_lossy(&raw).into_owned(),
                metadata: Box::new(metadata),
            });
        }

        let data = match content_type {
            _ if raw.is_empty() || declared_length == Some(0) => Payload::Empty,
            Some(content_type) => self.inner.mime.decode(content_type, &raw)?,
            None => Payload::Raw(raw),
        };

        Ok(Response {
            data,
            metadata,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::{MockRiak, ScriptedResponse};
    use serde_json::json;

    fn client(mock: &MockRiak) -> Client {
        Client::with_transport(ClientConfig::default(), Arc::new(mock.clone()))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ping_returns_plain_text_ok() {
        let mock = MockRiak::new();
        let result = client(&mock).ping().await.unwrap();
        assert_eq!(result, Payload::Text("OK".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn default_headers_fill_gaps_without_overriding() {
        let mock = MockRiak::new();
        mock.script(Method::Put, "/x", ScriptedResponse::new(204));
        let query = Query::new("/x")
            .with_metadata(Metadata::new().with_content_type("text/plain").with_meta("a", "b"))
            .with_body("hello");

        client(&mock).put(query).await.unwrap();

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.header("content-type"), Some("text/plain"));
        assert_eq!(sent.header("accept"), Some("*/*"));
        assert_eq!(sent.header("x-riak-meta-a"), Some("b"));
        assert_eq!(sent.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn json_body_is_encoded_for_default_content_type() {
        let mock = MockRiak::new();
        mock.script(Method::Post, "/x?returnbody=true", ScriptedResponse::new(204));
        let query = Query::new("/x")
            .with_option("returnbody", "true")
            .with_body(json!({"n": 1}));

        client(&mock).post(query).await.unwrap();

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.path, "/x?returnbody=true");
        assert_eq!(sent.header("content-type"), Some("application/json"));
        assert_eq!(sent.body, Bytes::from_static(br#"{"n":1}"#));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn status_400_and_above_is_an_error_with_raw_body() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/broken",
            ScriptedResponse::text(500, "Internal Server Error: boom"),
        );

        let error = client(&mock).get(Query::new("/broken")).await.unwrap_err();
        let RiakError::Http {
            status,
            body,
            metadata,
        } = error
        else {
            panic!("expected http error");
        };
        assert_eq!(status, 500);
        assert_eq!(body, "Internal Server Error: boom");
        assert_eq!(metadata.status_code(), Some(500));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn get_surfaces_404_but_delete_normalizes_it() {
        let mock = MockRiak::new();
        let client = client(&mock);

        let error = client
            .get(Query::new("/buckets/b/keys/missing"))
            .await
            .unwrap_err();
        assert!(error.is_not_found());

        let response = client
            .delete(Query::new("/buckets/b/keys/missing"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.metadata.status_code(), Some(404));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn body_is_truncated_to_declared_length() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/t",
            ScriptedResponse::new(200)
                .with_header("content-type", "text/plain")
                .with_header("content-length", "5")
                .with_chunk("hello")
                .with_chunk(" world"),
        );

        let response = client(&mock).get(Query::new("/t")).await.unwrap();
        assert_eq!(response.data, Payload::Text("hello".to_string()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_content_type_stays_raw_and_metadata_is_filtered() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/img",
            ScriptedResponse::new(200)
                .with_header("content-type", "image/png")
                .with_header("server", "MochiWeb/1.1")
                .with_header("date", "Tue, 15 Nov 1994 08:12:31 GMT")
                .with_header("vary", "Accept-Encoding")
                .with_header("x-riak-vclock", "abc=")
                .with_body(Bytes::from_static(&[0x89, 0x50])),
        );

        let response = client(&mock).get(Query::new("/img")).await.unwrap();
        assert_eq!(response.data, Payload::Raw(Bytes::from_static(&[0x89, 0x50])));
        assert_eq!(response.metadata.vclock.as_deref(), Some("abc="));
        assert_eq!(response.metadata.status_code(), Some(200));
        assert!(response.metadata.field("server").is_none());
        assert!(response.metadata.field("date").is_none());
        assert!(response.metadata.field("vary").is_none());
        assert!(response.metadata.field("content_length").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn malformed_json_is_a_decode_error() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/bad",
            ScriptedResponse::new(200)
                .with_header("content-type", "application/json")
                .with_body("{\"open\":"),
        );

        let error = client(&mock).get(Query::new("/bad")).await.unwrap_err();
        assert!(matches!(error, RiakError::Decode { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn chunked_responses_stream_fragments_without_classification() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/s",
            ScriptedResponse::new(200)
                .with_header("content-type", "application/json")
                .chunked(["{\"keys\":[", "\"a\"]}"]),
        );

        let dispatch = client(&mock)
            .request(Method::Get, Query::new("/s"))
            .await
            .unwrap();
        let Dispatch::Streaming {
            status,
            metadata,
            fragments,
        } = dispatch
        else {
            panic!("expected streaming dispatch");
        };
        assert_eq!(status, 200);
        assert!(metadata.is_chunked());

        let fragments: Vec<Response> = fragments
            .map(|fragment| fragment.unwrap())
            .collect()
            .await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(
            fragments[0].data,
            Payload::Raw(Bytes::from_static(b"{\"keys\":["))
        );
        assert_eq!(fragments[1].metadata, metadata);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn send_collects_chunked_bodies() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/s",
            ScriptedResponse::new(200)
                .with_header("content-type", "application/json")
                .chunked(["{\"n\":", "7}"]),
        );

        let response = client(&mock).get(Query::new("/s")).await.unwrap();
        assert_eq!(response.data, Payload::Json(json!({"n": 7})));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn transport_failure_returns_network_error_with_query() {
        let mock = MockRiak::new();
        mock.fail_path("/stats", TransportError::Connect("connection refused".to_string()));

        let error = client(&mock).stats().await.unwrap_err();
        let RiakError::Network {
            method,
            path,
            query,
            ..
        } = error
        else {
            panic!("expected network error");
        };
        assert_eq!(method, Method::Get);
        assert_eq!(path, "/stats");
        assert_eq!(query.resource, "/stats");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn builder_registers_extra_codecs() {
        struct Upper;
        impl MimeCodec for Upper {
            fn encode(&self, payload: &Payload) -> RiakResult<Bytes> {
                Ok(Bytes::from(payload.to_text().to_uppercase()))
            }
            fn decode(&self, body: &Bytes) -> RiakResult<Payload> {
                Ok(Payload::Text(String::from_utf8_lossy(body).to_lowercase()))
            }
        }

        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/u",
            ScriptedResponse::new(200)
                .with_header("content-type", "text/x-upper")
                .with_body("SHOUT"),
        );
        let client = Client::builder()
            .transport(Arc::new(mock.clone()))
            .codec("text/x-upper", Arc::new(Upper))
            .build()
            .unwrap();

        let response = client.get(Query::new("/u")).await.unwrap();
        assert_eq!(response.data, Payload::Text("shout".to_string()));
        assert!(client.mime().contains("application/json"));
    }
}
