use riak_http::{Client, ClientConfig, GetOptions, KeysMode, Metadata, Payload, SaveOptions};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

fn live_enabled() -> bool {
    std::env::var("RIAK_HTTP_LIVE")
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}

fn unique_bucket(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{prefix}-{nanos}")
}

#[tokio::test(flavor = "current_thread")]
#[ignore = "live test; requires running Riak node"]
async fn live_ping_expected_ok() {
    if !live_enabled() {
        return;
    }
    let client = Client::new(ClientConfig::from_env()).expect("client should build");
    let pong = client.ping().await.expect("ping should succeed");
    assert_eq!(pong, Payload::Text("OK".to_string()));
}

#[tokio::test(flavor = "current_thread")]
#[ignore = "live test; requires running Riak node"]
async fn live_object_lifecycle_expected_round_trip() {
    if !live_enabled() {
        return;
    }
    let client = Client::from_env().expect("client should build");
    let bucket = unique_bucket("riak-http-live");
    let objects = client.objects();

    objects
        .save(
            &bucket,
            Some("ada"),
            json!({"name": "Ada"}),
            SaveOptions::new().with_metadata(Metadata::new().with_meta("source", "live")),
        )
        .await
        .expect("save should succeed");

    let fetched = objects
        .get(&bucket, "ada", GetOptions::new())
        .await
        .expect("get should succeed");
    assert_eq!(fetched.data, Payload::Json(json!({"name": "Ada"})));
    assert_eq!(
        fetched.metadata.meta.get("source").map(String::as_str),
        Some("live")
    );

    let keys = client
        .buckets()
        .keys(&bucket, KeysMode::Stream)
        .await
        .expect("key listing should succeed");
    assert!(keys.contains(&"ada".to_string()));

    objects
        .delete(&bucket, "ada")
        .await
        .expect("delete should succeed");
    objects
        .delete(&bucket, "ada")
        .await
        .expect("second delete should also succeed");
    assert!(!objects.exists(&bucket, "ada").await.expect("head should succeed"));
}
