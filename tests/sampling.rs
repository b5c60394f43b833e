use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use research_mcp::{
    catalog::{research_registry, CatalogConfig},
    schema::*,
    testutils::*,
    Arguments, CapabilityRegistry, ClientConn, Error, Result, ServerAPI, ServerConfig,
};
use serde_json::json;
use tokio::sync::Notify;

fn catalog() -> CapabilityRegistry {
    research_registry(CatalogConfig::default().with_item_delay(Duration::ZERO)).unwrap()
}

/// Answers every sampling request with a fixed completion.
#[derive(Clone)]
struct FixedModel(&'static str);

#[async_trait]
impl ClientConn for FixedModel {
    async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        assert!(params.prompt_text().contains("I love this library"));
        Ok(CreateMessageResult::assistant_text("fixed-model", self.0))
    }
}

/// Never answers; records that it was asked and whether it was dropped.
#[derive(Clone, Default)]
struct SilentModel {
    asked: Arc<Notify>,
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientConn for SilentModel {
    async fn create_message(&self, _params: CreateMessageParams) -> Result<CreateMessageResult> {
        let _flag = DropFlag(self.dropped.clone());
        self.asked.notify_one();
        std::future::pending::<()>().await;
        unreachable!()
    }
}

fn sentiment_args() -> Arguments {
    Arguments::from([("text", "I love this library")])
}

#[tokio::test]
async fn test_sampling_round_trip() {
    for (answer, expected) in [
        ("Positive", "positive"),
        ("negative.", "negative"),
        ("hard to say", "neutral"),
    ] {
        let (client, handle) = connected_client_and_server_with_conn(
            catalog(),
            FixedModel(answer),
            ServerConfig::default(),
        )
        .await
        .unwrap();

        let result = client
            .call_tool("analyze_sentiment", sentiment_args())
            .await
            .unwrap();
        assert_eq!(
            result.value(),
            Some(&json!({"text": "I love this library", "sentiment": expected}))
        );
        shutdown_client_and_server(client, handle).await;
    }
}

#[tokio::test]
async fn test_client_without_sampling_fails_the_tool() {
    let (client, handle) = connected_client_and_server(catalog()).await.unwrap();
    let err = client
        .call_tool("analyze_sentiment", sentiment_args())
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::HandlerError { ref name, .. } if name == "analyze_sentiment"),
        "unexpected error: {err:?}"
    );
    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_sampling_timeout_is_reported_and_withdrawn() {
    let model = SilentModel::default();
    let (client, handle) = connected_client_and_server_with_conn(
        catalog(),
        model.clone(),
        ServerConfig::default().with_sampling_timeout(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    let err = client
        .call_tool("analyze_sentiment", sentiment_args())
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::SamplingTimeout(d) if d == Duration::from_millis(100)),
        "unexpected error: {err:?}"
    );

    // The server withdrew the request, so the client stopped working on it.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !model.dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    client.ping().await.unwrap();
    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_close_during_sampling_cancels_pending_call() {
    let model = SilentModel::default();
    let (client, handle) =
        connected_client_and_server_with_conn(catalog(), model.clone(), ServerConfig::default())
            .await
            .unwrap();
    let client = Arc::new(client);

    let asked = model.asked.notified();
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.call_tool("analyze_sentiment", sentiment_args()).await }
    });
    tokio::time::timeout(Duration::from_secs(2), asked).await.unwrap();

    client.close().await.unwrap();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)), "unexpected error: {err:?}");
    assert!(!client.is_open());

    let _ = tokio::time::timeout(Duration::from_millis(500), handle.stop()).await;
}
