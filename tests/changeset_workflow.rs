use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use transit_changesets::{build_app, MemoryStore};

// Test client wrapper driving the router in-process
struct TestClient {
    app: Router,
    token: Option<&'static str>,
}

impl TestClient {
    fn new(token: Option<&'static str>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            app: build_app(store, token.map(str::to_string)),
            token,
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(path);
        if let Some(token) = self.token {
            request = request.header("authorization", format!("Token token={}", token));
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn post_empty(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::POST, path, None).await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, path, Some(body)).await
    }
}

fn operator_payload() -> Value {
    json!({"changes": [{
        "action": "createUpdate",
        "operator": {
            "onestopId": "o-9q8y-SFMTA",
            "name": "San Francisco Municipal Transportation Agency",
            "website": "https://www.sfmta.com",
            "timezone": "America/Los_Angeles"
        }
    }]})
}

fn stop_payload() -> Value {
    json!({"changes": [{
        "action": "createUpdate",
        "stop": {
            "onestopId": "s-9q8yt4b-1AvHoS",
            "name": "1st Ave. & Holloway Street",
            "geometry": {"type": "Point", "coordinates": [-122.475075, 37.721323]},
            "operatorsServingStop": [{"operatorOnestopId": "o-9q8y-SFMTA"}]
        }
    }]})
}

#[tokio::test]
async fn test_changeset_complete_workflow() {
    let client = TestClient::new(None);

    let (status, health) = client.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    // Create with the operator, then append the stop that references it
    let (status, changeset) = client
        .post(
            "/api/v1/changesets",
            json!({"changeset": {"notes": "SFMTA import", "payload": operator_payload()}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(changeset["applied"], false);
    let id = changeset["id"].as_str().unwrap().to_string();

    let (status, _) = client
        .post(
            &format!("/api/v1/changesets/{}/append", id),
            json!({"change": stop_payload()}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, detail) = client.get(&format!("/api/v1/changesets/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["payload"]["changes"].as_array().unwrap().len(), 2);
    assert_eq!(detail["payloads"].as_array().unwrap().len(), 2);

    let (status, check) = client
        .post_empty(&format!("/api/v1/changesets/{}/check", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["trialSucceeds"], true);

    // The trial left nothing behind
    let (status, _) = client.get("/api/v1/onestop_id/s-9q8yt4b-1AvHoS").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, applied) = client
        .post_empty(&format!("/api/v1/changesets/{}/apply", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applied["changeset"]["applied"], true);
    assert!(applied["changeset"]["applied_at"].is_string());
    assert_eq!(applied["operations"], 2);

    let (status, stop) = client.get("/api/v1/onestop_id/s-9q8yt4b-1AvHoS").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stop["kind"], "stop");
    assert_eq!(stop["name"], "1st Ave. & Holloway Street");
    assert_eq!(stop["edges"][0]["to"], "o-9q8y-SFMTA");

    // Applied changesets are frozen
    let (status, error) = client
        .post(
            &format!("/api/v1/changesets/{}/append", id),
            json!({"change": stop_payload()}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "alreadyApplied");
    assert_eq!(
        error["message"],
        "cannot update a Changeset that has already been applied"
    );

    let (status, _) = client
        .put(
            &format!("/api/v1/changesets/{}", id),
            json!({"changeset": {"notes": "too late"}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, error) = client
        .post_empty(&format!("/api/v1/changesets/{}/revert", id))
        .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(error["error"], "revertUnsupported");

    let (status, list) = client.get("/api/v1/changesets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["changesets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_apply_reports_first_offending_change() {
    let client = TestClient::new(None);

    let (_, changeset) = client
        .post(
            "/api/v1/changesets",
            json!({"changeset": {"payload": stop_payload()}}),
        )
        .await;
    let id = changeset["id"].as_str().unwrap().to_string();

    let (status, check) = client
        .post_empty(&format!("/api/v1/changesets/{}/check", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["trialSucceeds"], false);

    let (status, error) = client
        .post_empty(&format!("/api/v1/changesets/{}/apply", id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "unresolvedIdentifier");
    assert_eq!(error["failure"]["position"], 0);
    assert_eq!(error["failure"]["cause"]["onestopId"], "o-9q8y-SFMTA");

    let (_, detail) = client.get(&format!("/api/v1/changesets/{}", id)).await;
    assert_eq!(detail["applied"], false);

    let (status, _) = client.get("/api/v1/onestop_id/s-9q8yt4b-1AvHoS").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_instantly_if_clean() {
    let client = TestClient::new(None);

    let (status, changeset) = client
        .post(
            "/api/v1/changesets",
            json!({"changeset": {"payload": operator_payload(), "whenToApply": "instantlyIfClean"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(changeset["applied"], true);

    let (status, operator) = client.get("/api/v1/onestop_id/o-9q8y-SFMTA").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(operator["website"], "https://www.sfmta.com");
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let client = TestClient::new(None);

    let (status, error) = client
        .post(
            "/api/v1/changesets",
            json!({"changeset": {"payload": {"changes": [{"stop": {"onestopId": "s-5b2-Fake"}}]}}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformedPayload");

    let (_, list) = client.get("/api/v1/changesets").await;
    assert!(list["changesets"].as_array().unwrap().is_empty());

    // `changes` is not a changeset field; only `payload` carries changes
    let (status, error) = client
        .post("/api/v1/changesets", json!({"changeset": {"changes": []}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformedPayload");

    let (status, error) = client
        .post(
            "/api/v1/changesets",
            json!({"changeset": {"whenToApply": "someday"}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformedPayload");
    assert!(error["message"].is_string());

    let (_, list) = client.get("/api/v1/changesets").await;
    assert!(list["changesets"].as_array().unwrap().is_empty());

    let (_, changeset) = client
        .post("/api/v1/changesets", json!({"changeset": {"notes": "draft"}}))
        .await;
    let id = changeset["id"].as_str().unwrap().to_string();

    let (status, error) = client
        .post(&format!("/api/v1/changesets/{}/append", id), json!({"changes": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformedPayload");

    let (status, error) = client
        .put(&format!("/api/v1/changesets/{}", id), json!({"changeset": {"notes": 7}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformedPayload");

    let (status, _) = client.get("/api/v1/changesets/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, error) = client.get("/api/v1/onestop_id/not-an-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalidOnestopId");
}

#[tokio::test]
async fn test_token_guards_mutations() {
    let authorized = TestClient::new(Some("secret"));
    let (status, _) = authorized
        .post("/api/v1/changesets", json!({"changeset": {"notes": "ok"}}))
        .await;
    assert_eq!(status, StatusCode::OK);

    // same router, no credentials
    let anonymous = TestClient {
        app: authorized.app.clone(),
        token: None,
    };
    let (status, error) = anonymous
        .post("/api/v1/changesets", json!({"changeset": {"notes": "nope"}}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"], "unauthorized");

    // reads stay open
    let (status, list) = anonymous.get("/api/v1/changesets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["changesets"].as_array().unwrap().len(), 1);
}
