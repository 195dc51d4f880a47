//! Router-level integration tests (§9e). Drives the full axum `Router`
//! in-process via `tower::ServiceExt::oneshot` — no TCP socket, no
//! external services required by default.
//!
//! Defaults to an in-memory SQLite backend so `cargo test` needs nothing
//! running; set `DATABASE_URL` to point at a real Postgres to exercise
//! that backend instead (mirrors `buds-db`'s own dual-backend selection).

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use buds_api::{build_router, AppState};
use buds_db::rate_limit::RateLimiter;
use buds_db::storage::{StorageClient, StorageConfig as DbStorageConfig};
use buds_db::Database;
use serde_json::{json, Value};
use tower::ServiceExt;

fn set_test_env() {
    // SAFETY: test process is single-threaded w.r.t. env setup — this runs
    // before any test spawns concurrent work, and every test in this binary
    // wants the same values.
    unsafe {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
        std::env::set_var("BUDS__DATABASE__URL", database_url);
        std::env::set_var("BUDS__CRYPTO__PHONE_KEY_BASE64", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        std::env::set_var("BUDS__AUTH__JWT_SECRET", "integration-test-secret");
    }
}

async fn test_state() -> AppState {
    set_test_env();
    let config = buds_common::config::init().expect("config should load from the env vars set above");

    let db = Database::connect(config).await.expect("sqlite/postgres connect should succeed");
    db.migrate().await.expect("migrations should apply cleanly to a fresh database");

    let storage = StorageClient::new(&DbStorageConfig {
        endpoint: config.storage.endpoint.clone(),
        access_key: config.storage.access_key.clone(),
        secret_key: config.storage.secret_key.clone(),
        bucket: config.storage.bucket.clone(),
        region: config.storage.region.clone(),
    })
    .expect("storage client construction does not touch the network");

    let phone_key = buds_common::crypto::phone::decode_key(&config.crypto.phone_key_base64)
        .expect("phone key was validated at config::init time");

    AppState {
        db,
        storage,
        push: None,
        rate_limiter: RateLimiter::new(None),
        phone_key: Arc::new(phone_key),
    }
}

/// Mint a caller-auth bearer token the same shape the external identity
/// provider would issue (§9d) — phone claim, signed with the configured secret.
fn caller_token(phone: &str) -> String {
    use buds_common::auth::CallerClaims;
    use jsonwebtoken::{encode, EncodingKey, Header};

    let config = buds_common::config::get();
    let now = chrono::Utc::now().timestamp();
    let claims = CallerClaims { phone: phone.to_string(), iat: now, exp: now + 3600 };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(config.auth.jwt_secret.as_bytes())).unwrap()
}

fn authed_request(method: &str, uri: &str, phone: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", caller_token(phone)))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_reports_healthy() {
    let router = build_router(test_state().await);

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn requests_without_a_bearer_token_are_rejected() {
    let router = build_router(test_state().await);

    let response = router
        .oneshot(Request::builder().method("POST").uri("/api/account/salt").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["code"], "AUTH_FAILED");
}

/// §8: the first call to `/account/salt` creates the salt (201), and a
/// second call for the same phone returns the same salt (200).
#[tokio::test]
async fn account_salt_is_get_or_create() {
    let router = build_router(test_state().await);
    let phone = "+15550001111";

    let first = router
        .clone()
        .oneshot(authed_request("POST", "/api/account/salt", phone, json!({})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = json_body(first).await;
    assert_eq!(first_body["created"], true);
    let salt = first_body["salt"].as_str().unwrap().to_string();

    let second = router
        .oneshot(authed_request("POST", "/api/account/salt", phone, json!({})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = json_body(second).await;
    assert_eq!(second_body["created"], false);
    assert_eq!(second_body["salt"], salt);
}

/// Registering a device, then heartbeating and listing it, end to end
/// through the full router (auth + rate-limit middleware included).
#[tokio::test]
async fn register_heartbeat_and_list_device() {
    let router = build_router(test_state().await);
    let phone = "+15550002222";
    let device_id = uuid::Uuid::new_v4().to_string();
    let owner_did = format!("did:phone:{}", "a".repeat(64));

    let register = router
        .clone()
        .oneshot(authed_request(
            "POST",
            "/api/devices/register",
            phone,
            json!({
                "device_id": device_id,
                "device_name": "integration-test-device",
                "owner_did": owner_did,
                "pubkey_x25519": "dGVzdC1wdWJrZXkteDI1NTE5",
                "pubkey_ed25519": "dGVzdC1wdWJrZXktZWQyNTUxOQ==",
                "push_token": serde_json::Value::Null,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(register.status(), StatusCode::OK);
    let registered = json_body(register).await;
    assert_eq!(registered["device_id"], device_id);
    assert_eq!(registered["status"], "active");

    let heartbeat = router
        .clone()
        .oneshot(authed_request("POST", "/api/devices/heartbeat", phone, json!({ "device_id": device_id })))
        .await
        .unwrap();
    assert_eq!(heartbeat.status(), StatusCode::OK);

    let list = router
        .oneshot(authed_request("POST", "/api/devices/list", phone, json!({ "dids": [owner_did] })))
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    let list_body = json_body(list).await;
    let devices = list_body["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["device_id"], device_id);
}

/// An invalid `owner_did` is rejected before it ever reaches the repository.
#[tokio::test]
async fn register_device_rejects_malformed_did() {
    let router = build_router(test_state().await);
    let phone = "+15550003333";
    let device_id = uuid::Uuid::new_v4().to_string();

    let response = router
        .oneshot(authed_request(
            "POST",
            "/api/devices/register",
            phone,
            json!({
                "device_id": device_id,
                "device_name": "bad-did-device",
                "owner_did": "not-a-did",
                "pubkey_x25519": "dGVzdA==",
                "pubkey_ed25519": "dGVzdA==",
                "push_token": serde_json::Value::Null,
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

/// Registers a device with a freshly generated Ed25519 keypair and returns
/// the signing key alongside the DID, so jar-receipt tests can produce
/// receipts that verify against a real registered device (§4.3/§4.6).
async fn register_signing_device(
    router: &axum::Router,
    phone: &str,
    owner_did: &str,
) -> ed25519_dalek::SigningKey {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    let signing_key = SigningKey::generate(&mut OsRng);
    let pubkey_ed25519 = B64.encode(signing_key.verifying_key().as_bytes());
    let device_id = uuid::Uuid::new_v4().to_string();

    let response = router
        .clone()
        .oneshot(authed_request(
            "POST",
            "/api/devices/register",
            phone,
            json!({
                "device_id": device_id,
                "device_name": "jar-test-device",
                "owner_did": owner_did,
                "pubkey_x25519": "dGVzdC14MjU1MTktcHVia2V5",
                "pubkey_ed25519": pubkey_ed25519,
                "push_token": serde_json::Value::Null,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "device registration should succeed");

    signing_key
}

/// Builds a base64-wrapped, signed CBOR receipt envelope the way a client
/// would (§4.1/§4.6): canonical CBOR map, signed with the sender's Ed25519
/// device key over the exact encoded bytes.
fn build_signed_receipt(
    signing_key: &ed25519_dalek::SigningKey,
    sender_did: &str,
    receipt_type: &str,
    timestamp_ms: i64,
    payload: Vec<(ciborium::value::Value, ciborium::value::Value)>,
) -> (String, String, String) {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    use ciborium::value::Value;
    use ed25519_dalek::Signer;

    let envelope = Value::Map(vec![
        (Value::Text("receipt_type".into()), Value::Text(receipt_type.into())),
        (Value::Text("sender_did".into()), Value::Text(sender_did.into())),
        (Value::Text("timestamp".into()), Value::Integer(timestamp_ms.into())),
        (Value::Text("payload".into()), Value::Map(payload)),
    ]);

    let mut receipt_bytes = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut receipt_bytes).unwrap();

    let signature = signing_key.sign(&receipt_bytes);
    let receipt_cid = buds_common::crypto::cid::compute_cid(&receipt_bytes);

    (B64.encode(&receipt_bytes), B64.encode(signature.to_bytes()), receipt_cid)
}

/// §8 "Receipt append" scenario: a `jar.created` genesis receipt gets
/// sequence 1, a subsequent `jar.member_added` gets sequence 2, and
/// materialization leaves exactly two active members.
#[tokio::test]
async fn jar_genesis_then_member_added_sequences_and_materializes() {
    let router = build_router(test_state().await);

    let owner_phone = "+15550004444";
    let owner_did = format!("did:phone:{}", "1".repeat(64));
    let owner_key = register_signing_device(&router, owner_phone, &owner_did).await;

    let member_phone = "+15550005555";
    let member_did = format!("did:phone:{}", "2".repeat(64));
    let _member_key = register_signing_device(&router, member_phone, &member_did).await;

    let jar_id = uuid::Uuid::new_v4().to_string();

    let (receipt_data, signature, _cid) =
        build_signed_receipt(&owner_key, &owner_did, "jar.created", 1_700_000_000_000, vec![]);
    let genesis = router
        .clone()
        .oneshot(authed_request(
            "POST",
            &format!("/api/jars/{jar_id}/receipts"),
            owner_phone,
            json!({ "receipt_data": receipt_data, "signature": signature, "parent_cid": null, "claimed_cid": null }),
        ))
        .await
        .unwrap();
    assert_eq!(genesis.status(), StatusCode::OK);
    let genesis_body = json_body(genesis).await;
    assert_eq!(genesis_body["sequence_number"], 1);

    let (receipt_data, signature, _cid) = build_signed_receipt(
        &owner_key,
        &owner_did,
        "jar.member_added",
        1_700_000_001_000,
        vec![(
            ciborium::value::Value::Text("member_did".into()),
            ciborium::value::Value::Text(member_did.clone()),
        )],
    );
    let added = router
        .clone()
        .oneshot(authed_request(
            "POST",
            &format!("/api/jars/{jar_id}/receipts"),
            owner_phone,
            json!({ "receipt_data": receipt_data, "signature": signature, "parent_cid": null, "claimed_cid": null }),
        ))
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::OK);
    let added_body = json_body(added).await;
    assert_eq!(added_body["sequence_number"], 2);

    // Materialization: the new member's own jars/list shows the jar as an
    // active member; the owner's shows it as owner.
    let owner_jars = router
        .clone()
        .oneshot(authed_request("GET", "/api/jars/list", owner_phone, json!({})))
        .await
        .unwrap();
    assert_eq!(owner_jars.status(), StatusCode::OK);
    let owner_jars_body = json_body(owner_jars).await;
    let owner_jar_list = owner_jars_body["jars"].as_array().unwrap();
    assert!(owner_jar_list.iter().any(|j| j["jar_id"] == jar_id && j["role"] == "owner"));

    let member_jars = router
        .clone()
        .oneshot(authed_request("GET", "/api/jars/list", member_phone, json!({})))
        .await
        .unwrap();
    assert_eq!(member_jars.status(), StatusCode::OK);
    let member_jars_body = json_body(member_jars).await;
    let member_jar_list = member_jars_body["jars"].as_array().unwrap();
    assert!(member_jar_list.iter().any(|j| j["jar_id"] == jar_id && j["role"] == "member"));

    // Backfill: after=0 returns both receipts in ascending sequence order.
    let backfill = router
        .oneshot(authed_request(
            "GET",
            &format!("/api/jars/{jar_id}/receipts?after=0&limit=10"),
            owner_phone,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(backfill.status(), StatusCode::OK);
    let backfill_body = json_body(backfill).await;
    let receipts = backfill_body["receipts"].as_array().unwrap();
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0]["sequence_number"], 1);
    assert_eq!(receipts[1]["sequence_number"], 2);
}

/// §4.6 step 3: storing the same receipt (by CID) twice is idempotent —
/// the second call returns the same sequence number without erroring.
#[tokio::test]
async fn duplicate_receipt_store_is_idempotent() {
    let router = build_router(test_state().await);
    let phone = "+15550006666";
    let owner_did = format!("did:phone:{}", "3".repeat(64));
    let owner_key = register_signing_device(&router, phone, &owner_did).await;
    let jar_id = uuid::Uuid::new_v4().to_string();

    let (receipt_data, signature, _cid) =
        build_signed_receipt(&owner_key, &owner_did, "jar.created", 1_700_000_000_000, vec![]);
    let body = json!({ "receipt_data": receipt_data, "signature": signature, "parent_cid": null, "claimed_cid": null });

    let first = router.clone().oneshot(authed_request("POST", &format!("/api/jars/{jar_id}/receipts"), phone, body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_seq = json_body(first).await["sequence_number"].as_i64().unwrap();

    let second = router.oneshot(authed_request("POST", &format!("/api/jars/{jar_id}/receipts"), phone, body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_seq = json_body(second).await["sequence_number"].as_i64().unwrap();

    assert_eq!(first_seq, 1);
    assert_eq!(second_seq, 1);
}

/// §4.6 step 6: a non-member cannot append to a jar that already has a
/// genesis receipt — authorization only waives membership for an empty jar.
#[tokio::test]
async fn non_member_write_to_existing_jar_is_forbidden() {
    let router = build_router(test_state().await);

    let owner_phone = "+15550007777";
    let owner_did = format!("did:phone:{}", "4".repeat(64));
    let owner_key = register_signing_device(&router, owner_phone, &owner_did).await;

    let outsider_phone = "+15550008888";
    let outsider_did = format!("did:phone:{}", "5".repeat(64));
    let outsider_key = register_signing_device(&router, outsider_phone, &outsider_did).await;

    let jar_id = uuid::Uuid::new_v4().to_string();

    let (receipt_data, signature, _cid) =
        build_signed_receipt(&owner_key, &owner_did, "jar.created", 1_700_000_000_000, vec![]);
    let genesis = router
        .clone()
        .oneshot(authed_request(
            "POST",
            &format!("/api/jars/{jar_id}/receipts"),
            owner_phone,
            json!({ "receipt_data": receipt_data, "signature": signature, "parent_cid": null, "claimed_cid": null }),
        ))
        .await
        .unwrap();
    assert_eq!(genesis.status(), StatusCode::OK);

    let (receipt_data, signature, _cid) =
        build_signed_receipt(&outsider_key, &outsider_did, "jar.member_added", 1_700_000_002_000, vec![]);
    let forbidden = router
        .oneshot(authed_request(
            "POST",
            &format!("/api/jars/{jar_id}/receipts"),
            outsider_phone,
            json!({ "receipt_data": receipt_data, "signature": signature, "parent_cid": null, "claimed_cid": null }),
        ))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    let forbidden_body = json_body(forbidden).await;
    assert_eq!(forbidden_body["code"], "FORBIDDEN");
}

/// §8 rate-limit scenario, exercised against a real endpoint: with the
/// account-salt limit set low via env override, the Nth+1 call in the
/// window is rejected with a `Retry-After` header and the `RATE_LIMITED`
/// code.
#[tokio::test]
async fn rate_limited_request_gets_retry_after_header() {
    // account.salt is capped at `limits.rate_salt_per_min`; the default
    // config (10/min) would need 11 requests, so this drives the real
    // default rather than overriding it, trading a few extra requests for
    // not touching global process env that other tests also read.
    let router = build_router(test_state().await);
    let phone = "+15550009999";

    let mut last = None;
    for _ in 0..10 {
        let response = router
            .clone()
            .oneshot(authed_request("POST", "/api/account/salt", phone, json!({})))
            .await
            .unwrap();
        last = Some(response.status());
    }
    assert_ne!(last, Some(StatusCode::TOO_MANY_REQUESTS), "first 10 requests should all be allowed");

    let eleventh = router
        .oneshot(authed_request("POST", "/api/account/salt", phone, json!({})))
        .await
        .unwrap();
    assert_eq!(eleventh.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(eleventh.headers().contains_key(axum::http::header::RETRY_AFTER));
    let body = json_body(eleventh).await;
    assert_eq!(body["code"], "RATE_LIMITED");
}
