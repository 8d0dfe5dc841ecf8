//! Sibling resolution for conflicted reads.
//!
//! A `300 Multiple Choices` read lists sibling vtags. Each one is fetched with
//! `vtag=<tag>`, a [`SiblingResolver`] picks the winner, and the winner is written
//! back in the background to collapse the conflict. The caller gets the winner
//! whether or not that write lands.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::bucket::{BucketObjects, RObject};
use crate::error::{RiakError, RiakResult};

/// Picks one sibling out of a conflicted key's versions.
pub trait SiblingResolver: Send + Sync {
    fn resolve(&self, siblings: Vec<RObject>) -> Option<RObject>;
}

impl<F> SiblingResolver for F
where
    F: Fn(Vec<RObject>) -> Option<RObject> + Send + Sync,
{
    fn resolve(&self, siblings: Vec<RObject>) -> Option<RObject> {
        self(siblings)
    }
}

/// Newest `last-modified` wins. A sibling with a timestamp beats one without;
/// ties and missing timestamps keep the sibling seen first.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastWriteWins;

impl SiblingResolver for LastWriteWins {
    fn resolve(&self, siblings: Vec<RObject>) -> Option<RObject> {
        let mut winner: Option<RObject> = None;
        for candidate in siblings {
            let replace = match &winner {
                None => true,
                Some(current) => {
                    match (candidate.last_modified(), current.last_modified()) {
                        (Some(candidate), Some(current)) => candidate > current,
                        (Some(_), None) => true,
                        _ => false,
                    }
                }
            };
            if replace {
                winner = Some(candidate);
            }
        }
        winner
    }
}

/// Vtags from a sibling listing: the `Siblings:` line is skipped, as are blank
/// lines and repeats.
pub fn parse_vtags(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    body.lines()
        .skip(1)
        .map(str::trim)
        .filter(|vtag| !vtag.is_empty())
        .filter(|vtag| seen.insert(vtag.to_string()))
        .map(str::to_string)
        .collect()
}

pub(crate) async fn resolve_conflict(
    objects: &BucketObjects,
    key: &str,
    vtags: &[String],
) -> RiakResult<RObject> {
    let wrap = |source: RiakError| RiakError::Resolution {
        bucket: objects.bucket().to_string(),
        key: key.to_string(),
        source: Box::new(source),
    };

    let siblings = objects.fetch_siblings(key, vtags).await.map_err(wrap)?;
    let fetched = siblings.len();
    let winner = objects.resolver().resolve(siblings).ok_or_else(|| {
        wrap(RiakError::InvalidResponse(
            "resolver returned no sibling".to_string(),
        ))
    })?;
    debug!(
        bucket = objects.bucket(),
        key,
        siblings = fetched,
        winner = winner.vtag.as_deref().unwrap_or_default(),
        "riak siblings resolved"
    );

    spawn_write_back(winner.clone());
    Ok(winner)
}

/// Save the winner on the ambient Tokio runtime without waiting for it. Without a
/// runtime the write-back is skipped and logged.
fn spawn_write_back(winner: RObject) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(
            bucket = %winner.bucket,
            key = winner.key.as_deref().unwrap_or_default(),
            "no tokio runtime; riak sibling write-back skipped"
        );
        return;
    };
    runtime.spawn(async move {
        if let Err(error) = winner.save().await {
            warn!(
                bucket = %winner.bucket,
                key = winner.key.as_deref().unwrap_or_default(),
                %error,
                "riak sibling write-back failed"
            );
        }
    });
}
