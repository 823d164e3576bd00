//! End-to-end tests against a real server over a loopback listener, covering
//! the concrete scenarios in spec.md §8.

use sha2::{Digest as _, Sha256};
use sorcerer::api;
use sorcerer::auth::htpasswd::HtpasswdAuth;
use sorcerer::auth::AuthMiddleware;
use sorcerer::state::AppState;
use sorcerer::store::ContentStore;
use tempfile::TempDir;
use tokio::net::TcpListener;

struct Fixture {
    base_url: String,
    _root: TempDir,
}

async fn start_server() -> Fixture {
    start_server_with_auth(AuthMiddleware::None).await
}

async fn start_server_with_auth(auth: AuthMiddleware) -> Fixture {
    let root = TempDir::new().expect("tempdir");
    let store = ContentStore::new(root.path());
    let state = AppState::new(store, auth);
    let app = api::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Fixture {
        base_url: format!("http://{addr}"),
        _root: root,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[tokio::test]
async fn monolithic_push_and_pull_round_trip() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();
    let body = b"";
    let digest = sha256_hex(body);

    let resp = client
        .post(format!(
            "{}/v2/alice/app/blobs/uploads/?digest={digest}",
            fixture.base_url
        ))
        .body(body.to_vec())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    assert_eq!(
        resp.headers().get("docker-content-digest").unwrap(),
        digest.as_str()
    );
    assert_eq!(
        resp.headers().get("location").unwrap(),
        &format!("/v2/alice/app/blobs/{digest}")
    );

    let get_resp = client
        .get(format!("{}/v2/alice/app/blobs/{digest}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(get_resp.status(), 200);
    assert_eq!(get_resp.bytes().await.unwrap().as_ref(), body);
}

#[tokio::test]
async fn chunked_push_assembles_all_chunks_in_order() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();

    let part_a = vec![1u8; 1000];
    let part_b = vec![2u8; 500];
    let mut whole = part_a.clone();
    whole.extend_from_slice(&part_b);
    let digest = sha256_hex(&whole);

    let initiate = client
        .post(format!("{}/v2/alice/app/blobs/uploads/", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(initiate.status(), 202);
    let location = initiate
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let chunk1 = client
        .patch(format!("{}{location}", fixture.base_url))
        .header("Content-Range", "0-999")
        .body(part_a)
        .send()
        .await
        .unwrap();
    assert_eq!(chunk1.status(), 202);
    assert_eq!(chunk1.headers().get("range").unwrap(), "0-999");

    let chunk2 = client
        .patch(format!("{}{location}", fixture.base_url))
        .header("Content-Range", "1000-1499")
        .body(part_b)
        .send()
        .await
        .unwrap();
    assert_eq!(chunk2.status(), 202);
    assert_eq!(chunk2.headers().get("range").unwrap(), "0-1499");

    let complete = client
        .put(format!("{}{location}?digest={digest}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(complete.status(), 201);

    let pulled = client
        .get(format!("{}/v2/alice/app/blobs/{digest}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(pulled.bytes().await.unwrap(), whole);
}

#[tokio::test]
async fn monolithic_push_with_wrong_digest_is_rejected() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();
    let fake_digest = format!("sha256:{}", "0".repeat(64));

    let resp = client
        .post(format!(
            "{}/v2/alice/app/blobs/uploads/?digest={fake_digest}",
            fixture.base_url
        ))
        .body("hello")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "DIGEST_INVALID");
}

#[tokio::test]
async fn out_of_order_chunk_is_rejected_and_offset_unchanged() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();

    let initiate = client
        .post(format!("{}/v2/alice/app/blobs/uploads/", fixture.base_url))
        .send()
        .await
        .unwrap();
    let location = initiate
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let first = client
        .patch(format!("{}{location}", fixture.base_url))
        .header("Content-Range", "0-999")
        .body(vec![7u8; 1000])
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 202);

    let out_of_order = client
        .patch(format!("{}{location}", fixture.base_url))
        .header("Content-Range", "500-999")
        .body(vec![8u8; 500])
        .send()
        .await
        .unwrap();
    assert_eq!(out_of_order.status(), 416);

    let status = client
        .get(format!("{}{location}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(status.headers().get("range").unwrap(), "0-999");
}

#[tokio::test]
async fn referrer_round_trip_with_artifact_type_filter() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();

    let config_bytes = b"{}";
    let config_digest = sha256_hex(config_bytes);
    client
        .post(format!(
            "{}/v2/alice/app/blobs/uploads/?digest={config_digest}",
            fixture.base_url
        ))
        .body(config_bytes.to_vec())
        .send()
        .await
        .unwrap();

    let manifest = format!(
        r#"{{"mediaType":"application/vnd.oci.image.manifest.v1+json","artifactType":"application/vnd.example.sig.v1","subject":{{"digest":"{config_digest}"}},"config":{{"mediaType":"application/vnd.oci.empty.v1+json"}}}}"#
    );
    let manifest_digest = sha256_hex(manifest.as_bytes());

    let put_resp = client
        .put(format!(
            "{}/v2/alice/app/manifests/signature",
            fixture.base_url
        ))
        .body(manifest.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(put_resp.status(), 201);
    assert_eq!(
        put_resp.headers().get("oci-subject").unwrap(),
        config_digest.as_str()
    );

    let referrers = client
        .get(format!(
            "{}/v2/alice/app/referrers/{config_digest}?artifactType=application/vnd.example.sig.v1",
            fixture.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(referrers.status(), 200);
    assert_eq!(
        referrers.headers().get("oci-filters-applied").unwrap(),
        "artifactType"
    );

    let index: serde_json::Value = referrers.json().await.unwrap();
    let manifests = index["manifests"].as_array().unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0]["digest"], manifest_digest);
}

#[tokio::test]
async fn deleting_manifest_by_digest_removes_its_tags() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();

    let manifest = r#"{"mediaType":"application/vnd.oci.image.manifest.v1+json"}"#;
    let digest = sha256_hex(manifest.as_bytes());

    client
        .put(format!("{}/v2/alice/app/manifests/latest", fixture.base_url))
        .body(manifest)
        .send()
        .await
        .unwrap();

    let delete_resp = client
        .delete(format!(
            "{}/v2/alice/app/manifests/{digest}",
            fixture.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(delete_resp.status(), 202);

    let tags = client
        .get(format!("{}/v2/alice/app/tags/list", fixture.base_url))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = tags.json().await.unwrap();
    assert_eq!(body["tags"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn basic_auth_enumeration_resistance() {
    let auth = HtpasswdAuth::from_contents("alice:hunter2\n").unwrap();
    let fixture = start_server_with_auth(AuthMiddleware::Htpasswd(auth)).await;
    let client = reqwest::Client::new();

    let wrong_password = client
        .head(format!(
            "{}/v2/alice/app/blobs/sha256:{}",
            fixture.base_url,
            "0".repeat(64)
        ))
        .basic_auth("alice", Some("wrongpassword"))
        .send()
        .await
        .unwrap();

    let unknown_user = client
        .head(format!(
            "{}/v2/alice/app/blobs/sha256:{}",
            fixture.base_url,
            "0".repeat(64)
        ))
        .basic_auth("ghost", Some("whatever"))
        .send()
        .await
        .unwrap();

    assert_eq!(wrong_password.status(), 401);
    assert_eq!(unknown_user.status(), 401);
    assert_eq!(
        wrong_password.headers().get("www-authenticate"),
        unknown_user.headers().get("www-authenticate")
    );
}

#[tokio::test]
async fn cross_repo_blob_mount_avoids_reupload() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();

    let body = b"shared layer contents";
    let digest = sha256_hex(body);

    client
        .post(format!(
            "{}/v2/alice/source/blobs/uploads/?digest={digest}",
            fixture.base_url
        ))
        .body(body.to_vec())
        .send()
        .await
        .unwrap();

    let mount_resp = client
        .post(format!(
            "{}/v2/alice/dest/blobs/uploads/?mount={digest}&from=alice/source",
            fixture.base_url
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(mount_resp.status(), 201);
    assert_eq!(
        mount_resp.headers().get("docker-content-digest").unwrap(),
        digest.as_str()
    );
    assert_eq!(
        mount_resp.headers().get("location").unwrap(),
        &format!("/v2/alice/dest/blobs/{digest}")
    );

    let pulled = client
        .get(format!("{}/v2/alice/dest/blobs/{digest}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(pulled.status(), 200);
    assert_eq!(pulled.bytes().await.unwrap().as_ref(), body);
}

#[tokio::test]
async fn mount_falls_back_to_new_session_when_source_missing() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();
    let missing_digest = format!("sha256:{}", "1".repeat(64));

    let resp = client
        .post(format!(
            "{}/v2/alice/dest/blobs/uploads/?mount={missing_digest}&from=alice/nowhere",
            fixture.base_url
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 202);
    assert!(resp.headers().get("location").unwrap().to_str().unwrap().contains("/blobs/uploads/"));
}

#[tokio::test]
async fn tag_listing_is_sorted_and_supports_pagination() {
    let fixture = start_server().await;
    let client = reqwest::Client::new();

    for tag in ["banana", "apple", "cherry", "date"] {
        let manifest = format!(r#"{{"mediaType":"application/vnd.oci.image.manifest.v1+json","marker":"{tag}"}}"#);
        client
            .put(format!(
                "{}/v2/alice/app/manifests/{tag}",
                fixture.base_url
            ))
            .body(manifest)
            .send()
            .await
            .unwrap();
    }

    let all = client
        .get(format!("{}/v2/alice/app/tags/list", fixture.base_url))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = all.json().await.unwrap();
    let tags: Vec<&str> = body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["apple", "banana", "cherry", "date"]);

    let limited = client
        .get(format!("{}/v2/alice/app/tags/list?n=2", fixture.base_url))
        .send()
        .await
        .unwrap();
    let limited_body: serde_json::Value = limited.json().await.unwrap();
    let limited_tags: Vec<&str> = limited_body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(limited_tags, vec!["apple", "banana"]);

    let after_cursor = client
        .get(format!(
            "{}/v2/alice/app/tags/list?last=banana",
            fixture.base_url
        ))
        .send()
        .await
        .unwrap();
    let after_body: serde_json::Value = after_cursor.json().await.unwrap();
    let after_tags: Vec<&str> = after_body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(after_tags, vec!["cherry", "date"]);
}

#[tokio::test]
async fn discovery_endpoint_bypasses_auth() {
    let auth = HtpasswdAuth::from_contents("alice:hunter2\n").unwrap();
    let fixture = start_server_with_auth(AuthMiddleware::Htpasswd(auth)).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/v2/", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
