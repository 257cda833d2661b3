//! End-to-end behaviour of the gateway client over a scripted transport.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use gateway_client::auth::{AuthEvent, CredentialRejection, SessionKey, SessionTokens, TokenRefresher};
use gateway_client::http::{CorrelationId, TransportRequest, X_API_KEY, X_CORRELATION_ID};
use gateway_client::network::ManualObserver;
use gateway_client::{
    ApiError, ApiResult, AuthFailure, ClientConfig, CredentialKind, ErrorKind, GatewayClient,
    RequestOptions,
};

mod common;
use common::{jwt, test_config, Reply, ScriptedTransport};

const BASE_URL: &str = "http://gateway.test";

fn build(config: ClientConfig, transport: &Arc<ScriptedTransport>) -> GatewayClient {
    GatewayClient::builder(config)
        .transport(transport.clone())
        .build()
        .unwrap()
}

fn bearer(request: &TransportRequest) -> Option<String> {
    request
        .headers
        .get(reqwest::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn has_header(request: &TransportRequest, name: &str) -> bool {
    request.headers.contains_key(name)
}

/// Refresher that sleeps, then hands back a fresh token.
struct SlowRefresher {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl TokenRefresher for SlowRefresher {
    async fn refresh(&self, _refresh_token: &str) -> ApiResult<SessionTokens> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(SessionTokens {
            access_token: jwt("late"),
            refresh_token: None,
            expires_in: None,
            token_type: None,
            user: None,
            user_info: None,
        })
    }
}

#[tokio::test]
async fn test_offline_blocks_standard_calls_but_not_login() {
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(200, json!({ "access_token": jwt("login"), "refresh_token": "rt-1" }))
    });
    let observer = Arc::new(ManualObserver::new(false));
    let client = GatewayClient::builder(test_config(BASE_URL))
        .transport(transport.clone())
        .network_observer(observer)
        .build()
        .unwrap();

    assert!(client.is_offline());
    let err = client
        .get::<Value>("/customers", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(transport.calls(), 0);

    let err = client
        .post::<Value>("/loans", Some(json!({ "amount": 100 })), RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(transport.calls(), 0);

    client.login("teller", "secret").await.unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.credential().kind(), CredentialKind::Jwt);
}

#[tokio::test]
async fn test_going_online_reopens_the_gate() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(200, json!({ "ok": true })));
    let observer = Arc::new(ManualObserver::new(false));
    let client = GatewayClient::builder(test_config(BASE_URL))
        .transport(transport.clone())
        .network_observer(observer.clone())
        .build()
        .unwrap();

    assert!(client.get::<Value>("/customers", None, RequestOptions::default()).await.is_err());

    observer.set_online(true);
    client.network().apply_change(true);

    let body: Value = client
        .get("/customers", None, RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(body, json!({ "ok": true }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_api_key_and_bearer_are_exclusive() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(200, json!({})));
    let client = build(test_config(BASE_URL), &transport);

    client.get::<Value>("/customers", None, RequestOptions::default()).await.unwrap();
    client.set_credential(Some(&jwt("user"))).unwrap();
    client.get::<Value>("/loans", None, RequestOptions::default()).await.unwrap();
    client.get::<Value>("/health", None, RequestOptions::default()).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);

    assert!(has_header(&requests[0], X_API_KEY));
    assert!(bearer(&requests[0]).is_none());

    assert!(!has_header(&requests[1], X_API_KEY));
    assert_eq!(bearer(&requests[1]), Some(format!("Bearer {}", jwt("user"))));

    assert!(!has_header(&requests[2], X_API_KEY));
    assert!(bearer(&requests[2]).is_none());

    for request in &requests {
        assert!(has_header(request, X_CORRELATION_ID));
    }
}

#[tokio::test]
async fn test_two_segment_token_rejected() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(200, json!({})));
    let mut config = test_config(BASE_URL);
    config.auth.allow_opaque_tokens = false;
    let client = build(config, &transport);

    let err = client
        .set_credential(Some("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxMjMifQ"))
        .unwrap_err();
    assert!(matches!(err, CredentialRejection::Malformed { segments: 2, .. }));
    assert_eq!(client.credential().kind(), CredentialKind::None);
    assert!(client.token_store().session_value(SessionKey::AccessToken).is_none());

    client.get::<Value>("/customers", None, RequestOptions::default()).await.unwrap();
    let request = &transport.requests()[0];
    assert!(bearer(request).is_none());
    assert!(has_header(request, X_API_KEY));
}

#[tokio::test]
async fn test_dev_bypass_token_never_sent() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(200, json!({})));
    let client = build(test_config(BASE_URL), &transport);

    assert_eq!(
        client.set_credential(Some("dev-bypass-token")),
        Err(CredentialRejection::DevBypass)
    );
    assert_eq!(client.credential().kind(), CredentialKind::None);

    client.get::<Value>("/customers", None, RequestOptions::default()).await.unwrap();
    let request = &transport.requests()[0];
    assert!(bearer(request).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_reads_share_one_request() {
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(200, json!({ "success": true, "data": [{ "id": 1 }] }))
            .after(Duration::from_millis(50))
    });
    let client = build(test_config(BASE_URL), &transport);
    let params = json!({ "page": 1 });

    let (a, b) = tokio::join!(
        client.get::<Value>("/customers", Some(&params), RequestOptions::default()),
        client.get::<Value>("/customers", Some(&params), RequestOptions::default()),
    );

    assert_eq!(a.unwrap(), json!([{ "id": 1 }]));
    assert_eq!(b.unwrap(), json!([{ "id": 1 }]));
    assert_eq!(transport.calls(), 1);

    let request = &transport.requests()[0];
    assert_eq!(request.url.path(), "/customers");
    assert_eq!(request.url.query(), Some("page=1"));
    assert_eq!(client.pending_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_read_failure_reaches_every_caller() {
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(503, json!({ "message": "maintenance" })).after(Duration::from_millis(20))
    });
    let client = build(test_config(BASE_URL), &transport);

    let results = join_all(
        (0..3).map(|_| client.get::<Value>("/customers", None, RequestOptions::default())),
    )
    .await;

    assert_eq!(transport.calls(), 1);
    for result in results {
        match result.unwrap_err() {
            ApiError::Service {
                status_code,
                message,
                ..
            } => {
                assert_eq!(status_code, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("expected service error, got {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_reader_does_not_cancel_shared_read() {
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(200, json!({ "id": 7 })).after(Duration::from_millis(100))
    });
    let client = build(test_config(BASE_URL), &transport);
    let token = CancellationToken::new();

    let cancelled = {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move {
            client
                .get::<Value>("/customers/7", None, RequestOptions::new().with_cancel(token))
                .await
        })
    };
    let kept = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .get::<Value>("/customers/7", None, RequestOptions::default())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    assert_eq!(cancelled.await.unwrap(), Err(ApiError::Cancelled));
    assert_eq!(kept.await.unwrap().unwrap(), json!({ "id": 7 }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_401s_share_one_refresh() {
    let fresh = jwt("fresh");
    let expected = format!("Bearer {}", fresh);
    let transport = ScriptedTransport::new(move |request, _| {
        if request.url.path() == "/auth/refresh" {
            return Reply::json(200, json!({ "access_token": fresh, "refresh_token": "rt-2" }))
                .after(Duration::from_millis(50));
        }
        if bearer(request).as_deref() == Some(expected.as_str()) {
            Reply::json(200, json!({ "path": request.url.path() }))
        } else {
            Reply::json(401, json!({ "detail": "token expired" }))
        }
    });
    let client = build(test_config(BASE_URL), &transport);
    client.set_credential(Some(&jwt("stale"))).unwrap();
    client
        .token_store()
        .store_session(SessionKey::RefreshToken, "rt-1");
    let mut events = client.subscribe_auth_events();

    let paths: Vec<String> = (0..5).map(|i| format!("/loans/{}", i)).collect();
    let results = join_all(
        paths
            .iter()
            .map(|p| client.get::<Value>(p, None, RequestOptions::default())),
    )
    .await;

    for (path, result) in paths.iter().zip(results) {
        assert_eq!(result.unwrap(), json!({ "path": path }));
        assert_eq!(transport.requests_to(path).len(), 2);
    }
    assert_eq!(transport.requests_to("/auth/refresh").len(), 1);
    assert_eq!(
        client.token_store().refresh_token().as_deref(),
        Some("rt-2")
    );
    assert_eq!(events.recv().await.unwrap(), AuthEvent::TokenRefreshed);
    assert!(!client.is_refreshing());
}

#[tokio::test]
async fn test_second_401_is_a_service_error() {
    let transport = ScriptedTransport::new(|request, _| {
        if request.url.path() == "/auth/refresh" {
            Reply::json(200, json!({ "access_token": jwt("again") }))
        } else {
            Reply::json(401, json!({ "detail": "still unauthorized" }))
        }
    });
    let client = build(test_config(BASE_URL), &transport);
    client.set_credential(Some(&jwt("stale"))).unwrap();
    client
        .token_store()
        .store_session(SessionKey::RefreshToken, "rt-1");

    let err = client
        .get::<Value>("/loans", None, RequestOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    assert_eq!(err.kind(), ErrorKind::Service);
    assert_eq!(transport.requests_to("/loans").len(), 2);
    assert_eq!(transport.requests_to("/auth/refresh").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_401_after_credential_swap_replays_without_refresh() {
    let fresh = jwt("rotated");
    let expected = format!("Bearer {}", fresh);
    let transport = ScriptedTransport::new(move |request, _| {
        if request.url.path() == "/auth/refresh" {
            return Reply::json(200, json!({ "access_token": jwt("unused") }));
        }
        if bearer(request).as_deref() == Some(expected.as_str()) {
            Reply::json(200, json!({ "loans": [] }))
        } else {
            Reply::json(401, json!({ "detail": "token expired" })).after(Duration::from_millis(100))
        }
    });
    let client = build(test_config(BASE_URL), &transport);
    client.set_credential(Some(&jwt("stale"))).unwrap();
    client
        .token_store()
        .store_session(SessionKey::RefreshToken, "rt-1");

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.get::<Value>("/loans", None, RequestOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.set_credential(Some(&fresh)).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), json!({ "loans": [] }));
    let sent = transport.requests_to("/loans");
    assert_eq!(sent.len(), 2);
    assert_eq!(bearer(&sent[1]), Some(format!("Bearer {}", fresh)));
    assert!(transport.requests_to("/auth/refresh").is_empty());
    assert!(!client.is_refreshing());
}

#[tokio::test]
async fn test_401_on_auth_endpoint_is_not_refreshed() {
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(401, json!({ "detail": "Invalid credentials" }))
    });
    let client = build(test_config(BASE_URL), &transport);

    let err = client.login("teller", "wrong").await.unwrap_err();
    assert_eq!(err.status_code(), Some(401));
    assert_eq!(transport.calls(), 1);
    assert!(!client.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn test_slow_refresh_times_out_and_clears_session() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(401, json!({})));
    let refresher = Arc::new(SlowRefresher {
        delay: Duration::from_secs(6),
        calls: AtomicUsize::new(0),
    });
    let client = GatewayClient::builder(test_config(BASE_URL))
        .transport(transport.clone())
        .refresher(refresher.clone())
        .build()
        .unwrap();
    client.set_credential(Some(&jwt("stale"))).unwrap();
    client
        .token_store()
        .store_session(SessionKey::RefreshToken, "rt-1");
    let mut events = client.subscribe_auth_events();

    let err = client
        .get::<Value>("/loans", None, RequestOptions::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::auth(AuthFailure::RefreshTimeout(Duration::from_secs(5)))
    );
    assert!(err.is_terminal());
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.credential().kind(), CredentialKind::None);
    assert!(client.token_store().refresh_token().is_none());
    assert_eq!(transport.requests_to("/loans").len(), 1);

    match events.recv().await.unwrap() {
        AuthEvent::LoginRequired { reason } => {
            assert_eq!(reason, AuthFailure::RefreshTimeout(Duration::from_secs(5)))
        }
        other => panic!("expected LoginRequired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_refresh_token_fails_auth() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(401, json!({})));
    let client = build(test_config(BASE_URL), &transport);
    client.set_credential(Some(&jwt("stale"))).unwrap();

    let err = client
        .get::<Value>("/loans", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::auth(AuthFailure::NoRefreshToken));
    assert_eq!(client.credential().kind(), CredentialKind::None);
}

#[tokio::test]
async fn test_login_unwraps_nested_envelope() {
    let token = jwt("login");
    let transport = ScriptedTransport::new(move |_, _| {
        Reply::json(
            200,
            json!({
                "success": true,
                "data": { "data": {
                    "access_token": token,
                    "refresh_token": "rt-login",
                    "expires_in": 3600,
                    "user": { "name": "Ada" }
                } }
            }),
        )
    });
    let client = build(test_config(BASE_URL), &transport);

    let tokens = client.login("ada", "secret").await.unwrap();

    assert_eq!(tokens.user_profile(), Some(&json!({ "name": "Ada" })));
    assert_eq!(client.credential().kind(), CredentialKind::Jwt);
    assert_eq!(client.token_store().refresh_token().as_deref(), Some("rt-login"));
    assert!(client.token_store().session_value(SessionKey::ExpiresAt).is_some());

    let request = &transport.requests()[0];
    assert_eq!(request.url.path(), "/api/v1/auth/login");
    assert_eq!(request.body, Some(json!({ "username": "ada", "password": "secret" })));
    assert!(bearer(request).is_none());
}

#[tokio::test]
async fn test_login_without_token_is_a_service_error() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(200, json!({ "success": true })));
    let client = build(test_config(BASE_URL), &transport);

    let err = client.login("ada", "secret").await.unwrap_err();
    assert_eq!(
        err,
        ApiError::service(
            500,
            "Invalid login response from server - no access token received",
            None
        )
    );
    assert_eq!(client.credential().kind(), CredentialKind::None);
}

#[tokio::test]
async fn test_logout_clears_everything() {
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(200, json!({ "access_token": jwt("login"), "refresh_token": "rt" }))
    });
    let client = build(test_config(BASE_URL), &transport);
    client.login("ada", "secret").await.unwrap();

    client.logout();
    assert_eq!(client.credential().kind(), CredentialKind::None);
    assert!(client.token_store().refresh_token().is_none());
}

#[tokio::test]
async fn test_correlation_ids() {
    let transport = ScriptedTransport::new(|request, _| {
        if request.url.path() == "/ok" {
            Reply::json(200, json!({})).with_header("x-correlation-id", "srv-123")
        } else {
            Reply::json(500, json!({ "detail": "boom" }))
        }
    });
    let client = build(test_config(BASE_URL), &transport);

    client.get::<Value>("/ok", None, RequestOptions::default()).await.unwrap();
    assert_eq!(client.last_correlation_id().as_deref(), Some("srv-123"));

    let options = RequestOptions::new().with_correlation_id(CorrelationId::from_string("cid-1"));
    let err = client.get::<Value>("/fail", None, options).await.unwrap_err();
    assert_eq!(err, ApiError::service(500, "boom", Some("cid-1".into())));

    let sent = &transport.requests_to("/fail")[0];
    assert_eq!(
        sent.headers.get(X_CORRELATION_ID).and_then(|v| v.to_str().ok()),
        Some("cid-1")
    );
}

#[tokio::test]
async fn test_unexpected_body_shape_is_reported() {
    let transport = ScriptedTransport::new(|_, _| Reply::json(200, json!("plain text")));
    let client = build(test_config(BASE_URL), &transport);

    let err = client
        .get::<Vec<u32>>("/numbers", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(502));
}

#[tokio::test]
async fn test_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let transport = ScriptedTransport::new(|_, _| {
        Reply::json(200, json!({ "access_token": jwt("persisted"), "refresh_token": "rt-p" }))
    });

    let mut config = test_config(BASE_URL);
    config.auth.session_file = Some(path.to_string_lossy().into_owned());

    let first = build(config.clone(), &transport);
    first.login("ada", "secret").await.unwrap();
    drop(first);

    let second = build(config, &transport);
    assert_eq!(second.credential().kind(), CredentialKind::Jwt);
    assert_eq!(second.token_store().refresh_token().as_deref(), Some("rt-p"));
}
