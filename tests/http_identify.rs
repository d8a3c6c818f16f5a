use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use identirust::http::{router, ErrorBody, HealthResponse, IdentifyResponse};
use identirust::test_support::{contact, seeded_store, ChurningStore};
use identirust::{ContactId, Identirust, IdentityView, ReconcileTuning};
use time::macros::datetime;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(
    identirust: &Arc<Identirust>,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> anyhow::Result<(StatusCode, Vec<u8>)> {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };
    let response = router(identirust.clone()).oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, bytes.to_vec()))
}

#[tokio::test]
async fn health_check_reports_online() -> anyhow::Result<()> {
    let identirust = Arc::new(Identirust::new());
    let (status, body) = send(&identirust, Method::GET, "/", None).await?;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body)?;
    assert_eq!(health.status, "Online");
    assert_eq!(
        health.documentation,
        "Please send POST requests to the /identify endpoint."
    );
    Ok(())
}

#[tokio::test]
async fn identify_wraps_view_in_contact_envelope() -> anyhow::Result<()> {
    let identirust = Arc::new(Identirust::new());
    send(
        &identirust,
        Method::POST,
        "/identify",
        Some(json!({"email": "lorraine@hillvalley.edu", "phoneNumber": "123456"})),
    )
    .await?;
    let (status, body) = send(
        &identirust,
        Method::POST,
        "/identify",
        Some(json!({"email": "mcfly@hillvalley.edu", "phoneNumber": 123456})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let raw: Value = serde_json::from_slice(&body)?;
    assert_eq!(
        raw,
        json!({
            "contact": {
                "primaryContactId": 1,
                "emails": ["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"],
                "phoneNumbers": ["123456"],
                "secondaryContactIds": [2]
            }
        })
    );

    let parsed: IdentifyResponse = serde_json::from_slice(&body)?;
    assert_eq!(parsed.contact.primary_contact_id, ContactId(1));
    Ok(())
}

#[tokio::test]
async fn missing_identifiers_is_a_client_error() -> anyhow::Result<()> {
    let identirust = Arc::new(Identirust::new());
    for payload in [
        json!({}),
        json!({"email": null, "phoneNumber": null}),
        json!({"email": "", "phoneNumber": 0}),
        json!({"email": ["a"]}),
    ] {
        let (status, body) =
            send(&identirust, Method::POST, "/identify", Some(payload)).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = serde_json::from_slice(&body)?;
        assert_eq!(error.error, "Either email or phoneNumber is required.");
    }
    assert_eq!(identirust.contact_count(), 0);
    Ok(())
}

#[tokio::test]
async fn contact_route_returns_cluster_or_404() -> anyhow::Result<()> {
    let identirust = Arc::new(Identirust::new());
    identirust.identify(Some("a"), None)?;
    let expected = identirust.identify(Some("a"), Some("1"))?;

    let (status, body) = send(&identirust, Method::GET, "/contacts/2", None).await?;
    assert_eq!(status, StatusCode::OK);
    let view: IdentityView = serde_json::from_slice(&body)?;
    assert_eq!(view, expected);

    let (status, _) = send(&identirust, Method::GET, "/contacts/42", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn conflict_exhaustion_is_an_opaque_server_error() -> anyhow::Result<()> {
    let store = seeded_store(vec![contact(
        1,
        Some("a@x.com"),
        None,
        None,
        datetime!(2023-04-01 00:00 UTC),
    )]);
    let identirust = Arc::new(Identirust::with_store_and_tuning(
        ChurningStore::new(store),
        ReconcileTuning::optimistic_only(2),
    ));

    let (status, body) = send(
        &identirust,
        Method::POST,
        "/identify",
        Some(json!({"email": "a@x.com", "phoneNumber": "555-0100"})),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorBody = serde_json::from_slice(&body)?;
    assert_eq!(error.error, "Internal Server Error");
    assert_eq!(identirust.contact_count(), 1);
    Ok(())
}

#[tokio::test]
async fn integral_float_phone_matches_stored_integer() -> anyhow::Result<()> {
    let identirust = Arc::new(Identirust::new());
    let expected = identirust.identify(Some("a@x.com"), Some("123456"))?;

    let (status, body) = send(
        &identirust,
        Method::POST,
        "/identify",
        Some(json!({"phoneNumber": 123456.0})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let parsed: IdentifyResponse = serde_json::from_slice(&body)?;
    assert_eq!(parsed.contact, expected);
    assert_eq!(identirust.contact_count(), 1);
    Ok(())
}
