use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};

use crate::buckets::{Buckets, IndexQuery, KeysMode, SolrQuery, solr_doc_ids};
use crate::client::Client;
use crate::error::{RiakError, RiakResult};
use crate::metadata::Metadata;
use crate::objects::{GetOptions, ObjectResponse, Objects, SaveOptions};
use crate::resolver::{LastWriteWins, SiblingResolver, resolve_conflict};
use crate::types::{Payload, Response};

/// Handle on one bucket and its locally held properties.
#[derive(Clone, Debug)]
pub struct Bucket {
    name: String,
    props: Value,
    client: Client,
}

impl Bucket {
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Value::Object(Map::new()),
            client,
        }
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn props(&self) -> &Value {
        &self.props
    }

    pub fn set_prop(&mut self, key: impl Into<String>, value: Value) {
        if !self.props.is_object() {
            self.props = Value::Object(Map::new());
        }
        if let Value::Object(props) = &mut self.props {
            props.insert(key.into(), value);
        }
    }

    fn buckets(&self) -> Buckets {
        self.client.buckets()
    }

    /// Replace the local properties with the server's.
    pub async fn refresh_props(&mut self) -> RiakResult<&Value> {
        self.props = self.buckets().props(&self.name).await?;
        Ok(&self.props)
    }

    /// Write the local properties. With `merge`, the server's current properties
    /// are fetched first and the local ones laid over them.
    pub async fn save(&mut self, merge: bool) -> RiakResult<Response> {
        if merge {
            let remote = self.buckets().props(&self.name).await?;
            self.props = merge_props(remote, &self.props);
        }
        self.buckets()
            .save_props(&self.name, self.props.clone())
            .await
    }

    /// Object operations with the default last-write-wins resolver.
    pub fn objects(&self) -> BucketObjects {
        BucketObjects::new(self.client.clone(), self.name.clone())
    }

    /// Objects whose keys match a secondary-index lookup.
    pub async fn search_index(&self, query: &IndexQuery) -> RiakResult<Vec<RObject>> {
        let keys = self.buckets().search_index(&self.name, query).await?;
        self.objects().get_many(keys).await
    }

    /// Objects whose keys come back as Riak Search document ids.
    pub async fn search_solr(&self, query: &SolrQuery) -> RiakResult<Vec<RObject>> {
        let result = self.buckets().search_solr(&self.name, query).await?;
        self.objects().get_many(solr_doc_ids(&result)).await
    }
}

fn merge_props(remote: Value, local: &Value) -> Value {
    match (remote, local) {
        (Value::Object(mut merged), Value::Object(local)) => {
            for (key, value) in local {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, local) => local.clone(),
    }
}

/// Object operations scoped to one bucket, with sibling resolution on read.
#[derive(Clone)]
pub struct BucketObjects {
    bucket: String,
    client: Client,
    resolver: Arc<dyn SiblingResolver>,
}

impl std::fmt::Debug for BucketObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketObjects")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl BucketObjects {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            client,
            resolver: Arc::new(LastWriteWins),
        }
    }

    pub fn with_resolver(mut self, resolver: impl SiblingResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(crate) fn resolver(&self) -> &dyn SiblingResolver {
        self.resolver.as_ref()
    }

    fn objects(&self) -> Objects {
        self.client.objects()
    }

    /// Local object; nothing is stored until [`RObject::save`].
    pub fn new_object(
        &self,
        key: Option<&str>,
        data: impl Into<Payload>,
        metadata: Metadata,
    ) -> RObject {
        RObject {
            bucket: self.bucket.clone(),
            key: key.map(str::to_string),
            data: data.into(),
            metadata,
            vtag: None,
            client: self.client.clone(),
        }
    }

    pub async fn get(&self, key: &str) -> RiakResult<Option<RObject>> {
        self.get_with(key, GetOptions::default()).await
    }

    /// Fetch one key. Missing keys read as `None`; conflicted keys are resolved
    /// before returning.
    pub async fn get_with(&self, key: &str, options: GetOptions) -> RiakResult<Option<RObject>> {
        let response = match self.objects().get(&self.bucket, key, options).await {
            Ok(response) => response,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };

        if response.has_siblings() {
            return resolve_conflict(self, key, &response.siblings)
                .await
                .map(Some);
        }
        Ok(Some(self.bind(response, None)))
    }

    /// Fetch several keys concurrently. Repeated keys are fetched once, missing
    /// keys are skipped, and results come back in completion order. The first
    /// failure aborts the batch.
    pub async fn get_many<I, K>(&self, keys: I) -> RiakResult<Vec<RObject>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut pending: FuturesUnordered<_> = keys
            .into_iter()
            .map(Into::into)
            .filter(|key: &String| seen.insert(key.clone()))
            .map(|key| async move { self.get(&key).await })
            .collect();

        let mut objects = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            if let Some(object) = result? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Every object in the bucket: a key listing followed by [`Self::get_many`].
    pub async fn all(&self) -> RiakResult<Vec<RObject>> {
        let keys = self
            .client
            .buckets()
            .keys(&self.bucket, KeysMode::Batch)
            .await?;
        self.get_many(keys).await
    }

    pub async fn save(&self, object: &RObject) -> RiakResult<RObject> {
        object.save().await
    }

    /// Save in parallel; results keep input order, the first failure wins.
    pub async fn save_many(&self, objects: &[RObject]) -> RiakResult<Vec<RObject>> {
        try_join_all(objects.iter().map(|object| object.save())).await
    }

    pub async fn delete(&self, key: &str) -> RiakResult<Response> {
        self.objects().delete(&self.bucket, key).await
    }

    pub async fn delete_many(&self, objects: &[RObject]) -> RiakResult<Vec<Response>> {
        try_join_all(objects.iter().map(|object| object.delete())).await
    }

    pub async fn exists(&self, key: &str) -> RiakResult<bool> {
        self.objects().exists(&self.bucket, key).await
    }

    /// Fetch each distinct vtag of `key` concurrently. Fails on the first error.
    pub async fn fetch_siblings(&self, key: &str, vtags: &[String]) -> RiakResult<Vec<RObject>> {
        let mut seen = HashSet::new();
        let fetches = vtags
            .iter()
            .filter(|vtag| seen.insert(vtag.to_string()))
            .map(|vtag| async move {
                let response = self
                    .objects()
                    .get(&self.bucket, key, GetOptions::new().with_vtag(vtag.as_str()))
                    .await?;
                Ok::<_, RiakError>(self.bind(response, Some(vtag.clone())))
            });
        try_join_all(fetches).await
    }

    fn bind(&self, response: ObjectResponse, vtag: Option<String>) -> RObject {
        RObject {
            bucket: response.bucket,
            key: Some(response.key),
            data: response.data,
            metadata: response.metadata,
            vtag,
            client: self.client.clone(),
        }
    }
}

/// A Riak object bound to its bucket.
#[derive(Clone, Debug)]
pub struct RObject {
    pub bucket: String,
    /// `None` until stored; Riak assigns one on first save.
    pub key: Option<String>,
    pub data: Payload,
    pub metadata: Metadata,
    /// Set when this object was fetched as one sibling of a conflict.
    pub vtag: Option<String>,
    client: Client,
}

impl RObject {
    pub fn last_modified(&self) -> Option<DateTime<FixedOffset>> {
        self.metadata.last_modified()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.content_type()
    }

    /// Store this object, sending back its vclock, indexes, user meta and content
    /// type. Returns the stored version.
    pub async fn save(&self) -> RiakResult<RObject> {
        let options = SaveOptions::new().with_metadata(self.metadata.writable());
        let saved = self
            .client
            .objects()
            .save(&self.bucket, self.key.as_deref(), self.data.clone(), options)
            .await?;

        let mut metadata = saved.metadata;
        if let Some(content_type) = self
            .content_type()
            .filter(|_| metadata.content_type().is_none())
        {
            metadata = metadata.with_content_type(content_type);
        }

        Ok(RObject {
            bucket: saved.bucket,
            key: Some(saved.key),
            data: saved.data,
            metadata,
            vtag: None,
            client: self.client.clone(),
        })
    }

    pub async fn delete(&self) -> RiakResult<Response> {
        let key = self.key.as_deref().ok_or_else(|| {
            RiakError::InvalidInput("cannot delete an object without a key".to_string())
        })?;
        self.client.objects().delete(&self.bucket, key).await
    }
}
