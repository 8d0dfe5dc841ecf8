#![doc = r#"
Async client for Riak's HTTP interface.

Operation mapping:

| Client method | Riak HTTP API |
| --- | --- |
| `Client::ping` | `GET /ping` |
| `Client::stats` | `GET /stats` |
| `Client::resources` | `GET /` |
| `Buckets::list` | `GET /buckets?buckets=true` |
| `Buckets::props` / `save_props` | `GET` / `PUT /buckets/:bucket/props` |
| `Buckets::keys` / `keys_stream` | `GET /buckets/:bucket/keys/?keys=true\|stream` |
| `Buckets::search_index` | `GET /buckets/:bucket/index/:index_(bin\|int)/:value[/:end]` |
| `Buckets::search_solr` | `GET /solr/:bucket/select/?q=...&wt=json` |
| `Objects::get` | `GET /buckets/:bucket/keys/:key` (`300` lists sibling vtags) |
| `Objects::save` | `PUT /buckets/:bucket/keys/:key`, or `POST /buckets/:bucket/keys` without a key |
| `Objects::exists` | `HEAD /buckets/:bucket/keys/:key` |
| `Objects::delete` | `DELETE /buckets/:bucket/keys/:key` (`404` is success) |

Implementation notes:
- Object metadata travels as `x-riak-*` headers; see [`metadata`] for the mapping.
- Bodies are encoded and decoded by content type through [`MimeRegistry`]; unknown types stay raw.
- Chunked responses are handed back fragment by fragment and reassembled by [`StreamAssembler`].
- Reads through [`BucketObjects`] resolve siblings with a [`SiblingResolver`]
  (last write wins by default) and write the winner back without waiting for it.
"#]

pub mod bucket;
pub mod buckets;
pub mod client;
pub mod config;
pub mod error;
pub mod metadata;
pub mod mime;
pub mod objects;
pub mod resolver;
pub mod stream;
pub mod testing;
pub mod transport;
pub mod types;

pub use bucket::{Bucket, BucketObjects, RObject};
pub use buckets::{Buckets, IndexQuery, IndexValue, KeyStream, KeysMode, SolrQuery, solr_doc_ids};
pub use client::{Client, ClientBuilder, Dispatch, FragmentStream};
pub use config::{
    BASE_URL_ENV, ClientConfig, DEFAULT_RIAK_HTTP_BASE_URL, Resources, TIMEOUT_ENV,
};
pub use error::{RiakError, RiakResult, TransportError};
pub use metadata::{IndexValues, Metadata};
pub use mime::{JsonCodec, MimeCodec, MimeRegistry, TextCodec};
pub use objects::{GetOptions, ObjectResponse, Objects, SaveOptions};
pub use resolver::{LastWriteWins, SiblingResolver, parse_vtags};
pub use stream::StreamAssembler;
pub use testing::{MockRiak, RecordedRequest, ScriptedResponse};
pub use transport::{ReqwestTransport, Transport, WireRequest, WireResponse};
pub use types::{Method, Payload, Query, Response};
