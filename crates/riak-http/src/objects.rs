use tracing::debug;

use crate::client::Client;
use crate::error::{RiakError, RiakResult};
use crate::metadata::Metadata;
use crate::resolver::parse_vtags;
use crate::types::{Payload, Query, Response, escape_component};

/// Read options: extra query-string options (`r`, `pr`, `vtag`, ...) and request metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetOptions {
    pub options: Vec<(String, String)>,
    pub metadata: Metadata,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Select a single sibling.
    pub fn with_vtag(self, vtag: impl Into<String>) -> Self {
        self.with_option("vtag", vtag)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Write options. `metadata` becomes the object's headers (content type, vclock,
/// indexes, user meta).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaveOptions {
    pub options: Vec<(String, String)>,
    pub metadata: Metadata,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Ask Riak to echo the stored object back.
    pub fn return_body(self) -> Self {
        self.with_option("returnbody", "true")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectResponse {
    pub bucket: String,
    pub key: String,
    pub data: Payload,
    pub metadata: Metadata,
    pub status: u16,
    /// Vtags listed by a `300 Multiple Choices` read; empty otherwise.
    pub siblings: Vec<String>,
}

impl ObjectResponse {
    pub fn has_siblings(&self) -> bool {
        !self.siblings.is_empty()
    }
}

/// Key/value operations addressed by bucket and key.
#[derive(Clone, Debug)]
pub struct Objects {
    client: Client,
}

impl Objects {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn keys_resource(&self, bucket: &str) -> String {
        format!(
            "{}/{}/keys",
            self.client.config().resources.buckets,
            escape_component(bucket)
        )
    }

    fn object_resource(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}", self.keys_resource(bucket), escape_component(key))
    }

    /// Fetch one object. A `300` is not an error: the sibling vtags are returned in
    /// [`ObjectResponse::siblings`] for the caller to resolve. A `300` that lists no
    /// vtags is an invalid response.
    pub async fn get(
        &self,
        bucket: &str,
        key: &str,
        options: GetOptions,
    ) -> RiakResult<ObjectResponse> {
        let query = Query::new(self.object_resource(bucket, key))
            .with_options(options.options)
            .with_metadata(options.metadata);
        let response = self.client.get(query).await?;

        let siblings = if response.status == 300 {
            parse_vtags(&response.data.to_text())
        } else {
            Vec::new()
        };
        if response.status == 300 && siblings.is_empty() {
            return Err(RiakError::InvalidResponse(format!(
                "multiple choices for {bucket}/{key} listed no sibling vtags"
            )));
        }
        if !siblings.is_empty() {
            debug!(bucket, key, siblings = siblings.len(), "riak object has siblings");
        }

        Ok(ObjectResponse {
            bucket: bucket.to_string(),
            key: key.to_string(),
            data: response.data,
            metadata: response.metadata,
            status: response.status,
            siblings,
        })
    }

    /// Store an object. Without a key the object is POSTed and Riak assigns one,
    /// read back from the `location` header. When the response carries no body
    /// (`204`, or a `201` without `returnbody`) the sent data is returned in its place.
    pub async fn save(
        &self,
        bucket: &str,
        key: Option<&str>,
        data: impl Into<Payload>,
        options: SaveOptions,
    ) -> RiakResult<ObjectResponse> {
        let data = data.into();
        let key = key.filter(|key| !key.is_empty());

        let resource = match key {
            Some(key) => self.object_resource(bucket, key),
            None => self.keys_resource(bucket),
        };
        let query = Query::new(resource)
            .with_options(options.options)
            .with_metadata(options.metadata)
            .with_body(data.clone());

        let response = match key {
            Some(_) => self.client.put(query).await?,
            None => self.client.post(query).await?,
        };

        let key = match key {
            Some(key) => key.to_string(),
            None => assigned_key(&response)?,
        };
        let data = if response.status == 204 || response.data.is_empty() {
            data
        } else {
            response.data
        };

        Ok(ObjectResponse {
            bucket: bucket.to_string(),
            key,
            data,
            metadata: response.metadata,
            status: response.status,
            siblings: Vec::new(),
        })
    }

    /// `HEAD` probe; a 404 reads as `false`.
    pub async fn exists(&self, bucket: &str, key: &str) -> RiakResult<bool> {
        let query = Query::new(self.object_resource(bucket, key));
        match self.client.head(query).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Delete a key. Deleting a missing key succeeds.
    pub async fn delete(&self, bucket: &str, key: &str) -> RiakResult<Response> {
        self.client
            .delete(Query::new(self.object_resource(bucket, key)))
            .await
    }
}

fn assigned_key(response: &Response) -> RiakResult<String> {
    response
        .metadata
        .location()
        .and_then(|location| location.rsplit('/').next())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            RiakError::InvalidResponse("created object response has no location key".to_string())
        })
}
