use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use research_mcp::{
    catalog::{research_registry, CatalogConfig},
    schema::*,
    testutils::*,
    CapabilityRegistry, Client, ClientConn, Error, ProcessTransport, Result, Server, ServerAPI,
    ServerHandle,
};

#[derive(Debug, Clone, Default)]
struct LifecycleTestClient {
    connect_count: Arc<AtomicU32>,
    disconnect_count: Arc<AtomicU32>,
}

#[async_trait]
impl ClientConn for LifecycleTestClient {
    async fn on_connect(&self, _server: &Implementation) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_disconnect(&self) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn catalog() -> CapabilityRegistry {
    research_registry(CatalogConfig::default().with_item_delay(Duration::ZERO)).unwrap()
}

#[tokio::test]
async fn test_client_lifecycle() {
    init_tracing();
    let client_conn = LifecycleTestClient::default();
    let (client, handle) = connected_client_and_server_with_conn(
        catalog(),
        client_conn.clone(),
        Default::default(),
    )
    .await
    .unwrap();

    assert!(client.is_open());
    assert_eq!(client_conn.connect_count.load(Ordering::SeqCst), 1);
    assert_eq!(client_conn.disconnect_count.load(Ordering::SeqCst), 0);

    let info = client.server_info().unwrap();
    assert_eq!(info.server_info.name, "test-server");
    assert_eq!(info.protocol_version, LATEST_PROTOCOL_VERSION);
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.logging.is_some());

    client.ping().await.unwrap();

    client.close().await.unwrap();
    assert!(!client.is_open());
    assert_eq!(client_conn.disconnect_count.load(Ordering::SeqCst), 1);

    // A second close is a no-op.
    client.close().await.unwrap();
    assert_eq!(client_conn.disconnect_count.load(Ordering::SeqCst), 1);

    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));

    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_server_disconnect_fails_calls() {
    let (client, handle) = connected_client_and_server(catalog()).await.unwrap();
    handle.stop().await.unwrap();

    // The reader notices the closed stream and marks the session closed.
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.is_open() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_server_program_is_connection_failure() {
    let client = Client::new("test-client", "1.0.0");
    let transport = ProcessTransport::new("/nonexistent/research-server", Vec::<String>::new());
    let err = client.open(Box::new(transport)).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_client_can_reopen_after_close() {
    let client = Client::new("test-client", "1.0.0");
    for _ in 0..2 {
        let server = Server::new("test-server", "1.0.0", catalog());
        let (server_reader, server_writer, client_reader, client_writer) = make_duplex_pair();
        let handle = ServerHandle::from_stream(server, server_reader, server_writer)
            .await
            .unwrap();
        client
            .connect_stream(client_reader, client_writer)
            .await
            .unwrap();
        client.ping().await.unwrap();
        client.close().await.unwrap();
        let _ = tokio::time::timeout(Duration::from_millis(100), handle.stop()).await;
    }
}

#[tokio::test]
async fn test_requests_before_initialize_are_rejected() {
    let server = Server::new("test-server", "1.0.0", catalog());
    let (server_reader, server_writer, client_reader, mut client_writer) = make_duplex_pair();
    let handle = ServerHandle::from_stream(server, server_reader, server_writer)
        .await
        .unwrap();
    let mut reader = tokio::io::BufReader::new(client_reader);

    let request = JSONRPCMessage::Request(JSONRPCRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: RequestId::Number(1),
        request: Request {
            method: "tools/list".to_string(),
            params: None,
        },
    });
    send_message(&mut client_writer, &request).await.unwrap();

    match read_message(&mut reader).await.unwrap() {
        JSONRPCMessage::Error(error) => {
            assert_eq!(error.id, RequestId::Number(1));
            assert_eq!(error.error.code, INVALID_REQUEST);
        }
        other => panic!("expected an error, got {other:?}"),
    }
    let _ = handle.stop().await;
}
