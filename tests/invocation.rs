use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use research_mcp::{
    catalog::{research_registry, CatalogConfig},
    schema::*,
    testutils::*,
    Arguments, CapabilityKind, CapabilityRegistry, Error, ResourceContent, ResourceDescriptor,
    ResourceRequest, ServerAPI, ServerCtx, ToolDescriptor,
};
use serde_json::{json, Value};

fn catalog() -> CapabilityRegistry {
    research_registry(CatalogConfig::default().with_item_delay(Duration::ZERO)).unwrap()
}

#[tokio::test]
async fn test_echo_end_to_end() {
    let (client, handle) = connected_client_and_server(catalog()).await.unwrap();

    let result = client
        .call_tool("echo", Arguments::from([("message", "Hello, MCP!")]))
        .await
        .unwrap();
    assert_eq!(result.text(), Some("Echo: Hello, MCP!"));
    assert_eq!(result.value(), Some(&json!("Echo: Hello, MCP!")));

    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_errors_keep_their_kind_across_the_wire() {
    let registry = catalog()
        .with_tool(ToolDescriptor::new(
            "explode",
            ToolInputSchema::default(),
            |_ctx: ServerCtx, _args: Arguments| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            },
        ))
        .unwrap();
    let (client, handle) = connected_client_and_server(registry).await.unwrap();

    let err = client.call_tool("missing", Arguments::new()).await.unwrap_err();
    assert!(
        matches!(err, Error::NotFound { kind: CapabilityKind::Tool, ref key } if key == "missing"),
        "unexpected error: {err:?}"
    );

    let err = client.call_tool("echo", Arguments::new()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgs { ref name, .. } if name == "echo"));

    let err = client
        .call_tool("echo", Arguments::new().with("message", 42))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgs { .. }));

    let err = client.call_tool("explode", Arguments::new()).await.unwrap_err();
    assert!(
        matches!(err, Error::HandlerError { ref name, ref message } if name == "explode" && message.contains("kaboom"))
    );

    // The session survives a panicking handler.
    client.ping().await.unwrap();

    let err = client.read_resource("nothing://here").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: CapabilityKind::Resource, .. }));

    let err = client.get_prompt("nope", Arguments::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: CapabilityKind::Prompt, .. }));

    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_resources() {
    let (client, handle) = connected_client_and_server(catalog()).await.unwrap();

    let greeting = client.read_resource("greeting://Alice").await.unwrap();
    assert_eq!(greeting.text(), Some("Hello, Alice!"));
    assert_eq!(greeting.contents[0].uri, "greeting://Alice");

    let config = client.read_resource("data://config").await.unwrap();
    assert_eq!(config.contents[0].mime_type.as_deref(), Some("application/json"));
    let parsed: Value = serde_json::from_str(config.text().unwrap()).unwrap();
    assert_eq!(parsed["theme"], "dark");
    assert_eq!(parsed["features"], json!(["tools", "resources"]));

    let summary = client
        .call_tool(
            "summarize_document",
            Arguments::from([("document_uri", "data://config")]),
        )
        .await
        .unwrap();
    assert!(summary.text().unwrap().starts_with("Full document ("));

    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_prompts() {
    let (client, handle) = connected_client_and_server(catalog()).await.unwrap();

    let weather = client
        .get_prompt("get_weather_prompt", Arguments::from([("city", "Oslo")]))
        .await
        .unwrap();
    assert_eq!(weather.first_text(), Some("What is the weather like in Oslo?"));

    let search = client
        .get_prompt(
            "get_google_news_search_prompt",
            Arguments::from([("keyword", "Rust")]),
        )
        .await
        .unwrap();
    assert_eq!(search.first_text(), Some("Rust -game -sports"));

    let err = client
        .get_prompt("get_weather_prompt", Arguments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgs { ref message, .. } if message.contains("city")));

    let job = client
        .get_prompt("get_job_template_prompt", Arguments::new())
        .await
        .unwrap();
    assert!(job.first_text().unwrap().contains("1. Clarify the goal"));

    shutdown_client_and_server(client, handle).await;
}

#[tokio::test]
async fn test_listing_never_invokes_handlers() {
    let calls = Arc::new(AtomicU32::new(0));
    let tool_calls = calls.clone();
    let resource_calls = calls.clone();
    let registry = CapabilityRegistry::new()
        .with_tool(ToolDescriptor::new(
            "count",
            ToolInputSchema::default(),
            move |_ctx: ServerCtx, _args: Arguments| {
                let calls = tool_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                }
            },
        ))
        .unwrap()
        .with_resource(
            ResourceDescriptor::new("item", "items://{id}", move |_ctx: ServerCtx, req: ResourceRequest| {
                let calls = resource_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ResourceContent::Text(req.uri))
                }
            })
            .unwrap(),
        )
        .unwrap();
    let (client, handle) = connected_client_and_server(registry).await.unwrap();

    assert_eq!(client.list_tools().await.unwrap().tools.len(), 1);
    assert!(client.list_resources().await.unwrap().resources.is_empty());
    let templates = client.list_resource_templates().await.unwrap();
    assert_eq!(templates.resource_templates[0].uri_template, "items://{id}");
    assert!(client.list_prompts().await.unwrap().prompts.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    client.call_tool("count", Arguments::new()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    shutdown_client_and_server(client, handle).await;
}
