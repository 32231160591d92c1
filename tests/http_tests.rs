//! HTTP routes driven through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use bulkcert::http::{router, AppState};
use common::{zip_entries, Harness};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(Arc::new(AppState {
        splitter: h.splitter.clone(),
        aggregator: h.aggregator.clone(),
        assembler: h.assembler.clone(),
    }))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        },
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, bytes)
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn submit(app: &Router, quantity: i64) -> String {
    let (status, headers, body) = send(
        app,
        Method::POST,
        "/cas/default/bulk-certificates",
        Some(json!({
            "quantity": quantity,
            "certInfo": {
                "commonNamePrefix": "web-",
                "commonNameGenerator": "increment",
                "commonNameStart": "1"
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body = json_body(&body);
    let task_id = body["taskId"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "in_progress");
    assert_eq!(
        headers[header::LOCATION].to_str().unwrap(),
        format!("/bulk-certificates/{task_id}")
    );
    task_id
}

#[tokio::test]
async fn full_lifecycle() {
    let h = Harness::new(2);
    let app = app(&h);
    let task_id = submit(&app, 3).await;
    let status_uri = format!("/bulk-certificates/{task_id}");
    let artifacts_uri = format!("{status_uri}/artifacts");

    let (status, _, body) = send(&app, Method::GET, &status_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let view = json_body(&body);
    assert_eq!(view["status"], "PENDING");
    assert_eq!(view["chunksTotal"], 2);
    assert_eq!(view["chunksPending"], 2);

    let (status, headers, _) = send(&app, Method::GET, &artifacts_uri, None).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION].to_str().unwrap(), status_uri);

    assert_eq!(h.drain().await, 2);

    let (status, _, body) = send(&app, Method::GET, &status_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "COMPLETE");

    let (status, headers, body) = send(&app, Method::GET, &artifacts_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(&format!("{task_id}.zip")));
    assert_eq!(zip_entries(&body).len(), 6);
    assert_eq!(std::fs::read_dir(h.bundle_dir.path()).unwrap().count(), 0);

    let links_uri = format!("{artifacts_uri}?links=true");
    let (status, _, body) = send(&app, Method::GET, &links_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["links"].as_array().unwrap().len(), 2);

    let (status, _, body) = send(&app, Method::DELETE, &artifacts_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "deleted": 2 }));

    let (status, _, body) = send(&app, Method::GET, &artifacts_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "NOT_FOUND");
}

#[tokio::test]
async fn unknown_task_is_404_json() {
    let h = Harness::new(2);
    let app = app(&h);
    for uri in ["/bulk-certificates/nope", "/bulk-certificates/nope/artifacts"] {
        let (status, _, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        let body = json_body(&body);
        assert_eq!(body["error"], "NOT_FOUND");
        assert!(body["message"].as_str().unwrap().contains("nope"));
    }
}

#[tokio::test]
async fn invalid_requests_are_400() {
    let h = Harness::new(2);
    let app = app(&h);
    let cert_info = json!({ "commonName": "x" });
    let cases = [
        ("/cas/default/bulk-certificates", json!({ "quantity": 0, "certInfo": cert_info })),
        ("/cas/default/bulk-certificates", json!({ "quantity": -1, "certInfo": cert_info })),
        ("/cas/ghost/bulk-certificates", json!({ "quantity": 1, "certInfo": cert_info })),
        (
            "/cas/default/bulk-certificates",
            json!({ "quantity": 1, "certInfo": { "commonName": "x", "validityDays": 4_000_000 } }),
        ),
    ];
    for (uri, body) in cases {
        let (status, _, response) = send(&app, Method::POST, uri, Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json_body(&response)["error"], "VALIDATION");
    }
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn replay_republishes_pending_chunks() {
    let h = Harness::new(2);
    let app = app(&h);
    let task_id = submit(&app, 5).await;
    assert_eq!(h.discard_queue(), 3);

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/bulk-certificates/{task_id}/replay"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "republished": 3 }));
    assert_eq!(h.drain().await, 3);

    let status_uri = format!("/bulk-certificates/{task_id}");
    let (_, _, body) = send(&app, Method::GET, &status_uri, None).await;
    assert_eq!(json_body(&body)["status"], "COMPLETE");
}
