use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt, stream};
use serde_json::{Map, Value};
use tracing::debug;

use crate::bucket::Bucket;
use crate::client::{Client, Dispatch};
use crate::error::{RiakError, RiakResult};
use crate::mime::APPLICATION_JSON;
use crate::stream::StreamAssembler;
use crate::types::{Method, Payload, Query, Response, escape_component};

/// Key batches in arrival order; the stream ends with the response.
pub type KeyStream = BoxStream<'static, RiakResult<Vec<String>>>;

/// How a key listing is fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeysMode {
    /// `keys=stream`: chunked, assembled into batches as they arrive.
    #[default]
    Stream,
    /// `keys=true`: one buffered response.
    Batch,
}

impl KeysMode {
    fn as_option(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Batch => "true",
        }
    }
}

/// One secondary-index term. The variant picks the index's `_bin`/`_int` suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexValue {
    Bin(String),
    Int(i64),
}

impl IndexValue {
    fn suffix(&self) -> &'static str {
        match self {
            Self::Bin(_) => "bin",
            Self::Int(_) => "int",
        }
    }

    fn to_segment(&self) -> String {
        match self {
            Self::Bin(value) => escape_component(value),
            Self::Int(value) => value.to_string(),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::Bin(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::Bin(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Secondary-index lookup: an exact match or an inclusive range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexQuery {
    Exact {
        index: String,
        value: IndexValue,
    },
    Range {
        index: String,
        start: IndexValue,
        end: IndexValue,
    },
}

impl IndexQuery {
    pub fn exact(index: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self::Exact {
            index: index.into(),
            value: value.into(),
        }
    }

    pub fn range(
        index: impl Into<String>,
        start: impl Into<IndexValue>,
        end: impl Into<IndexValue>,
    ) -> Self {
        Self::Range {
            index: index.into(),
            start: start.into(),
            end: end.into(),
        }
    }

    /// `<index>_<suffix>/<value>` or `<index>_<suffix>/<start>/<end>`.
    ///
    /// Names that already carry a `_bin`/`_int` suffix, and the built-in `$key`/`$bucket`
    /// indexes, are used as given.
    pub fn path_segment(&self) -> RiakResult<String> {
        let (index, first, rest) = match self {
            Self::Exact { index, value } => (index, value, None),
            Self::Range { index, start, end } => {
                if start.suffix() != end.suffix() {
                    return Err(RiakError::InvalidInput(format!(
                        "index range on {index} mixes binary and integer bounds"
                    )));
                }
                (index, start, Some(end))
            }
        };

        let name = if index.starts_with('$') || index.ends_with("_bin") || index.ends_with("_int")
        {
            escape_component(index)
        } else {
            format!("{}_{}", escape_component(index), first.suffix())
        };

        let mut segment = format!("{name}/{}", first.to_segment());
        if let Some(end) = rest {
            segment.push('/');
            segment.push_str(&end.to_segment());
        }
        Ok(segment)
    }
}

/// Riak Search (Solr interface) query. `wt` defaults to `json`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolrQuery {
    pub q: String,
    pub params: Vec<(String, String)>,
}

impl SolrQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    fn options(&self) -> Vec<(String, String)> {
        let mut options = vec![("q".to_string(), self.q.clone())];
        options.extend(self.params.iter().cloned());
        if !self.params.iter().any(|(key, _)| key == "wt") {
            options.push(("wt".to_string(), "json".to_string()));
        }
        options
    }
}

/// Document ids (`response.docs[].id`) from a Solr JSON result.
pub fn solr_doc_ids(result: &Value) -> Vec<String> {
    result
        .pointer("/response/docs")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .filter_map(|doc| match doc.get("id")? {
                    Value::String(id) => Some(id.clone()),
                    Value::Number(id) => Some(id.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Bucket-level operations.
#[derive(Clone, Debug)]
pub struct Buckets {
    client: Client,
}

impl Buckets {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn bucket_resource(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.client.config().resources.buckets,
            escape_component(name)
        )
    }

    /// Every bucket name the node knows about.
    pub async fn list(&self) -> RiakResult<Vec<String>> {
        let query = Query::new(self.client.config().resources.buckets.clone())
            .with_option("buckets", "true");
        let response = self.client.get(query).await?;
        Ok(string_array(&response.data, "buckets"))
    }

    /// Bucket properties (`props` object; empty when absent).
    pub async fn props(&self, name: &str) -> RiakResult<Value> {
        let query = Query::new(format!("{}/props", self.bucket_resource(name)));
        let response = self.client.get(query).await?;
        Ok(response
            .data
            .as_json()
            .and_then(|body| body.get("props"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    pub async fn save_props(&self, name: &str, props: Value) -> RiakResult<Response> {
        let mut body = Map::new();
        body.insert("props".to_string(), props);
        let query = Query::new(format!("{}/props", self.bucket_resource(name)))
            .with_body(Value::Object(body));
        self.client.put(query).await
    }

    /// Handle on a bucket. No request is issued.
    pub fn get(&self, name: impl Into<String>) -> Bucket {
        Bucket::new(self.client.clone(), name)
    }

    /// All keys of a bucket, fully collected.
    pub async fn keys(&self, name: &str, mode: KeysMode) -> RiakResult<Vec<String>> {
        match mode {
            KeysMode::Batch => {
                let response = self.client.get(self.keys_query(name, mode)).await?;
                Ok(string_array(&response.data, "keys"))
            }
            KeysMode::Stream => {
                let batches: Vec<Vec<String>> = self.keys_stream(name).await?.try_collect().await?;
                Ok(batches.into_iter().flatten().collect())
            }
        }
    }

    /// Streamed key listing. Chunk boundaries are reassembled into whole
    /// `{"keys":[...]}` objects before decoding, so every item is a complete batch.
    /// A response that ends inside an object yields a final `InvalidResponse`.
    pub async fn keys_stream(&self, name: &str) -> RiakResult<KeyStream> {
        let dispatch = self
            .client
            .request(Method::Get, self.keys_query(name, KeysMode::Stream))
            .await?;

        match dispatch {
            Dispatch::Complete(response) => {
                let keys = string_array(&response.data, "keys");
                Ok(stream::iter([Ok(keys)]).boxed())
            }
            Dispatch::Streaming {
                metadata,
                fragments,
                ..
            } => {
                let mime = self.client.mime().clone();
                let content_type = metadata
                    .content_type()
                    .unwrap_or(APPLICATION_JSON)
                    .to_string();
                let state = (fragments, StreamAssembler::json_objects(), false);

                let batches = stream::unfold(state, move |(mut fragments, mut assembler, done)| {
                    let mime = mime.clone();
                    let content_type = content_type.clone();
                    async move {
                        if done {
                            return None;
                        }
                        loop {
                            match fragments.next().await {
                                Some(Err(error)) => {
                                    return Some((Err(error), (fragments, assembler, true)));
                                }
                                Some(Ok(fragment)) => {
                                    let Some(object) = assembler.push(&fragment.data.to_bytes())
                                    else {
                                        continue;
                                    };
                                    let keys = mime
                                        .decode(&content_type, &object)
                                        .map(|payload| string_array(&payload, "keys"));
                                    if let Ok(keys) = &keys {
                                        debug!(keys = keys.len(), "riak key batch assembled");
                                    }
                                    return Some((keys, (fragments, assembler, false)));
                                }
                                None if assembler.pending() > 0 => {
                                    let error = RiakError::InvalidResponse(format!(
                                        "key stream ended mid-object with {} bytes pending",
                                        assembler.pending()
                                    ));
                                    return Some((Err(error), (fragments, assembler, true)));
                                }
                                None => return None,
                            }
                        }
                    }
                });
                Ok(batches.boxed())
            }
        }
    }

    /// Keys matching a secondary-index lookup.
    pub async fn search_index(&self, name: &str, query: &IndexQuery) -> RiakResult<Vec<String>> {
        let resource = format!(
            "{}/index/{}",
            self.bucket_resource(name),
            query.path_segment()?
        );
        let response = self.client.get(Query::new(resource)).await?;
        Ok(string_array(&response.data, "keys"))
    }

    /// Raw Riak Search result for the bucket's index.
    pub async fn search_solr(&self, name: &str, query: &SolrQuery) -> RiakResult<Value> {
        let resource = format!(
            "{}/{}/select/",
            self.client.config().resources.solr,
            escape_component(name)
        );
        let response = self
            .client
            .get(Query::new(resource).with_options(query.options()))
            .await?;
        match response.data {
            Payload::Json(value) => Ok(value),
            Payload::Empty => Ok(Value::Null),
            other => Err(RiakError::InvalidResponse(format!(
                "solr search returned a non-json body: {}",
                other.to_text()
            ))),
        }
    }

    fn keys_query(&self, name: &str, mode: KeysMode) -> Query {
        Query::new(format!("{}/keys/", self.bucket_resource(name)))
            .with_option("keys", mode.as_option())
    }
}

fn string_array(payload: &Payload, field: &str) -> Vec<String> {
    payload
        .as_json()
        .and_then(|body| body.get(field))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::config::ClientConfig;
    use crate::testing::{MockRiak, ScriptedResponse};

    #[test]
    fn index_suffix_follows_value_type() {
        assert_eq!(
            IndexQuery::exact("email", "ada@example.com")
                .path_segment()
                .unwrap(),
            "email_bin/ada%40example.com"
        );
        assert_eq!(
            IndexQuery::range("age", 18i64, 65i64).path_segment().unwrap(),
            "age_int/18/65"
        );
        assert_eq!(
            IndexQuery::exact("age_int", 3i64).path_segment().unwrap(),
            "age_int/3"
        );
        assert_eq!(
            IndexQuery::range("$key", "a", "m").path_segment().unwrap(),
            "%24key/a/m"
        );
    }

    #[test]
    fn mixed_range_bounds_are_rejected() {
        let error = IndexQuery::range("age", 1i64, "z").path_segment().unwrap_err();
        assert!(matches!(error, RiakError::InvalidInput(_)));
    }

    #[test]
    fn solr_defaults_to_json_writer() {
        let query = SolrQuery::new("name:ada").with_param("rows", "5");
        assert_eq!(
            query.options(),
            vec![
                ("q".to_string(), "name:ada".to_string()),
                ("rows".to_string(), "5".to_string()),
                ("wt".to_string(), "json".to_string()),
            ]
        );
        let xml = SolrQuery::new("*:*").with_param("wt", "xml");
        assert_eq!(xml.options().len(), 2);
    }

    #[test]
    fn solr_doc_ids_reads_response_docs() {
        let result = json!({"response": {"numFound": 2, "docs": [{"id": "a"}, {"id": 7}, {}]}});
        assert_eq!(solr_doc_ids(&result), vec!["a", "7"]);
        assert!(solr_doc_ids(&json!({})).is_empty());
    }

    #[test]
    fn missing_key_arrays_read_as_empty() {
        assert!(string_array(&Payload::Json(json!({"other": 1})), "keys").is_empty());
        assert!(string_array(&Payload::Empty, "keys").is_empty());
        assert_eq!(
            string_array(&Payload::Json(json!({"keys": ["a", 1, "b"]})), "keys"),
            vec!["a", "b"]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn truncated_key_stream_ends_with_error() {
        let mock = MockRiak::new();
        mock.script(
            Method::Get,
            "/buckets/items/keys/?keys=stream",
            ScriptedResponse::new(200)
                .with_header("content-type", APPLICATION_JSON)
                .chunked([r#"{"keys":["a"]}"#, r#"{"keys":["b","c"#]),
        );
        let buckets =
            Client::with_transport(ClientConfig::default(), Arc::new(mock.clone())).buckets();

        let batches: Vec<RiakResult<Vec<String>>> =
            buckets.keys_stream("items").await.unwrap().collect().await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].as_ref().unwrap(), &vec!["a".to_string()]);
        assert!(matches!(batches[1], Err(RiakError::InvalidResponse(_))));

        mock.script(
            Method::Get,
            "/buckets/items/keys/?keys=stream",
            ScriptedResponse::new(200)
                .with_header("content-type", APPLICATION_JSON)
                .chunked([r#"{"keys":["a"]}"#, r#"{"keys":["b","c"#]),
        );
        let error = buckets.keys("items", KeysMode::Stream).await.unwrap_err();
        assert!(matches!(error, RiakError::InvalidResponse(_)));
    }
}
