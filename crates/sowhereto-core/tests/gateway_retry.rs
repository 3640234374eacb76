//! Gateway behavior end to end: bearer attachment, the single 401 retry,
//! refresh de-duplication, failure broadcasts and the guard afterwards.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use common::{drain, respond, token_expiring_in, Harness, ScriptedTransport};
use sowhereto_core::events::SESSION_EXPIRED_REDIRECT;
use sowhereto_core::{ApiError, ApiRequest, AppEvent, GuardDecision, Location, Persistence, TransportError};

/// `/bookings` accepts only `good`; `/auth/refresh` mints `good`
fn backend(good: String) -> ScriptedTransport {
    ScriptedTransport::new(move |request| match request.path.as_str() {
        "/bookings" if request.bearer.as_deref() == Some(good.as_str()) => {
            respond(200, json!({"bookings": [{"id": 1}]}))
        }
        "/bookings" => respond(401, json!({"message": "Token expired"})),
        "/auth/refresh" => respond(200, json!({"token": good})),
        other => panic!("unexpected request to {}", other),
    })
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried_transparently() {
    let stale = token_expiring_in(-30);
    let fresh = token_expiring_in(3600);
    let harness = Harness::new(backend(fresh.clone()));
    harness.session.set_token(&stale, true).expect("token");
    harness.session.set_refresh_token("r1").expect("refresh token");
    let mut rx = harness.events.subscribe();

    let body: Value = harness.client.get("/bookings").await.expect("bookings");

    assert_eq!(body["bookings"][0]["id"], 1);
    assert_eq!(
        harness.transport.bearers_for("/bookings"),
        vec![Some(stale), Some(fresh.clone())]
    );
    assert_eq!(harness.transport.calls_to("/auth/refresh"), 1);
    assert_eq!(harness.session.token(), Some(fresh.clone()));
    assert_eq!(harness.storage.get_in(Persistence::Durable, "token"), Some(fresh));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn second_401_is_propagated_without_another_refresh() {
    let harness = Harness::new(ScriptedTransport::new(|request| match request.path.as_str() {
        "/auth/refresh" => respond(200, json!({"token": token_expiring_in(3600)})),
        _ => respond(401, json!({"message": "Nope"})),
    }));
    harness.session.set_token(&token_expiring_in(3600), true).expect("token");
    harness.session.set_refresh_token("r1").expect("refresh token");

    let err = harness
        .client
        .send(ApiRequest::get("/admin"))
        .await
        .expect_err("still unauthorized");

    assert!(err.is_unauthorized());
    assert_eq!(harness.transport.calls_to("/admin"), 2);
    assert_eq!(harness.transport.calls_to("/auth/refresh"), 1);
    // the refreshed session itself is left alone
    assert!(harness.session.is_authenticated());
}

#[tokio::test]
async fn failed_refresh_ends_session_and_guard_redirects_to_login() {
    let harness = Harness::new(ScriptedTransport::new(|request| match request.path.as_str() {
        "/auth/refresh" => respond(401, json!({"message": "Refresh token revoked"})),
        _ => respond(401, json!({"message": "Token expired"})),
    }));
    harness.session.set_token(&token_expiring_in(-30), false).expect("token");
    harness.session.set_refresh_token("revoked").expect("refresh token");
    let mut rx = harness.events.subscribe();

    let err = harness
        .client
        .send(ApiRequest::get("/bookings"))
        .await
        .expect_err("session over");

    // the original 401 reaches the caller
    assert!(matches!(err, ApiError::Unauthorized(ref body) if body.summary() == "Token expired"));
    assert_eq!(harness.transport.calls_to("/bookings"), 1);
    assert_eq!(harness.session.token(), None);
    assert_eq!(harness.session.refresh_token(), None);
    assert!(!harness.session.is_authenticated());
    assert_eq!(
        drain(&mut rx),
        vec![AppEvent::SessionExpired {
            redirect: SESSION_EXPIRED_REDIRECT.to_string()
        }]
    );

    let decision = harness.guard.check("/bookings").expect("check");
    assert_eq!(
        decision,
        GuardDecision::Redirect(Location::new("/login").with_query("redirect", "/bookings"))
    );
}

#[tokio::test]
async fn missing_refresh_token_ends_session_on_401() {
    let harness = Harness::new(ScriptedTransport::new(|_| respond(401, json!({}))));
    harness.session.set_token(&token_expiring_in(3600), true).expect("token");
    let mut rx = harness.events.subscribe();

    let err = harness.client.send(ApiRequest::get("/profile")).await.expect_err("401");

    assert!(err.is_unauthorized());
    assert_eq!(harness.transport.calls_to("/auth/refresh"), 0);
    assert_eq!(harness.session.token(), None);
    assert_eq!(drain(&mut rx), vec![AppEvent::session_expired()]);
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let stale = token_expiring_in(-30);
    let fresh = token_expiring_in(3600);
    let harness = Harness::new(backend(fresh.clone()).with_refresh_delay(Duration::from_millis(50)));
    harness.session.set_token(&stale, true).expect("token");
    harness.session.set_refresh_token("r1").expect("refresh token");

    let client = Arc::new(harness.client.clone());
    let calls = (0..4).map(|_| {
        let client = client.clone();
        async move { client.get::<Value>("/bookings").await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(harness.transport.calls_to("/auth/refresh"), 1);
    assert_eq!(harness.session.token(), Some(fresh));
}

#[tokio::test]
async fn failures_are_broadcast_and_propagated() {
    let harness = Harness::new(ScriptedTransport::new(|request| match request.path.as_str() {
        "/forbidden" => respond(403, json!({"message": "Admins only"})),
        "/missing" => respond(404, json!({})),
        "/busy" => respond(429, json!({})),
        "/broken" => respond(502, json!({})),
        "/invalid" => respond(422, json!({"errors": {"date": ["must be in the future"]}})),
        _ => Err(TransportError::NoResponse("connection reset".to_string())),
    }));
    let mut rx = harness.events.subscribe();

    for path in ["/forbidden", "/missing", "/busy", "/broken", "/invalid", "/offline"] {
        let result = harness.client.send(ApiRequest::get(path)).await;
        assert!(result.is_err(), "{} should fail", path);
    }

    assert_eq!(
        drain(&mut rx),
        vec![
            AppEvent::forbidden(),
            AppEvent::not_found(),
            AppEvent::rate_limited(),
            AppEvent::server_error(502),
            AppEvent::network(),
        ]
    );
}

#[tokio::test]
async fn validation_errors_reach_the_caller() {
    let harness = Harness::new(ScriptedTransport::new(|_| {
        respond(422, json!({"message": "Invalid", "errors": {"email": ["already taken"]}}))
    }));

    let err = harness
        .client
        .post::<Value, _>("/auth/register", &json!({"email": "a@b.com"}))
        .await
        .expect_err("422");

    let errors = err.field_errors().expect("field errors");
    assert_eq!(errors["email"], vec!["already taken".to_string()]);
}

#[tokio::test]
async fn signed_in_navigation_and_post_login_destination() {
    let harness = Harness::new(backend(token_expiring_in(3600)));

    let transition = harness.guard.navigate("/booking/7?tab=flights").expect("navigate");
    assert_eq!(transition.route, "login");
    assert_eq!(transition.location.query_value("redirect"), Some("/booking/7?tab=flights"));

    harness.session.set_token(&token_expiring_in(3600), true).expect("token");
    assert_eq!(harness.guard.take_post_login_destination(), "/booking/7?tab=flights");

    let transition = harness.guard.navigate("/login").expect("navigate");
    assert_eq!(transition.route, "home");
    assert_eq!(transition.redirected_from.as_deref(), Some("/login"));
}
