//! Control-channel lifecycle: gate authentication and manager handover.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error, Message};
use tokio_tungstenite::connect_async;

mod common;
use common::*;

#[tokio::test]
async fn bad_token_is_rejected_with_401() {
    let (proxy, _shutdown) = spawn_relay(test_config()).await;

    let mut request = format!("ws://127.0.0.1:{}/manager", proxy.port())
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-manager-token", "wrong".parse().unwrap());

    match connect_async(request).await {
        Err(Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("upgrade should fail with 401, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_token_is_rejected_with_401() {
    let (proxy, _shutdown) = spawn_relay(test_config()).await;

    let request = format!("ws://127.0.0.1:{}/manager", proxy.port())
        .into_client_request()
        .unwrap();

    match connect_async(request).await {
        Err(Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("upgrade should fail with 401, got {other:?}"),
    }
}

#[tokio::test]
async fn query_token_is_accepted() {
    let (proxy, _shutdown) = spawn_relay(test_config()).await;

    let request = format!(
        "ws://127.0.0.1:{}/manager?token={}",
        proxy.port(),
        TEST_TOKEN
    )
    .into_client_request()
    .unwrap();

    connect_async(request)
        .await
        .expect("query-parameter token must authenticate");
}

#[tokio::test]
async fn new_manager_supersedes_old_and_fails_its_waiters() {
    let (target, _seen) = start_recording_target("hi").await;
    let mut config = test_config();
    // Long deadline so the 504 below can only come from the handover.
    config.manager.decision_timeout_ms = 5_000;
    let (proxy, _shutdown) = spawn_relay(config).await;

    let mut old_manager = connect_manager(proxy, TEST_TOKEN).await;

    let client = proxy_client(proxy);
    let url = format!("http://127.0.0.1:{}/a", target.port());
    let pending_request = tokio::spawn({
        let client = client.clone();
        let url = url.clone();
        async move { client.get(url).send().await.unwrap() }
    });

    // The old manager sees the review but never answers.
    let frame = next_frame(&mut old_manager).await;
    assert_eq!(frame["type"], "review-request");

    let started = Instant::now();
    let new_manager = connect_manager(proxy, TEST_TOKEN).await;

    let response = pending_request.await.unwrap();
    assert_eq!(response.status(), 504);
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "waiter must fail on handover, not on its deadline"
    );

    // The superseded channel is closed by the relay.
    loop {
        match old_manager.next().await {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => continue,
        }
    }

    // The new channel reviews subsequent traffic.
    let _new_manager = accept_all(new_manager);
    let response = client.get(url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hi");
}
