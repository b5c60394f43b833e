//! The research server's capability catalog.
//!
//! Everything the demo server exposes is registered here at startup; the
//! registry is immutable afterwards.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    arguments::Arguments,
    context::ServerCtx,
    error::Result,
    registry::{
        CapabilityRegistry, PromptDescriptor, ResourceContent, ResourceDescriptor,
        ResourceRequest, ToolDescriptor,
    },
    schema::PromptMessage,
};

/// Default `strftime` pattern for `get_current_time`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Documents longer than this many words are truncated by
/// [`summarize_text`].
pub const SUMMARY_WORD_LIMIT: usize = 100;

const JOB_TEMPLATE: &str = "\
Break the goal down into tasks and carry them out with the following steps.
1. Clarify the goal
2. Identify the resources and information needed
3. Split the work into tasks
4. Decide how to carry out each task
5. Carry out the tasks
6. Evaluate the results
7. Adjust as needed
8. Deliver the final output
9. Collect feedback
10. Plan the next steps
Following these steps makes the path to the goal clear.
The task to carry out is as follows.
";

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Simulated work per item in `process_items`.
    pub item_delay: Duration,
    /// `strftime` pattern used by `get_current_time`.
    pub time_format: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_millis(100),
            time_format: TIME_FORMAT.to_string(),
        }
    }
}

impl CatalogConfig {
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoParams {
    /// Message to echo back
    message: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ProcessItemsParams {
    /// Items to process, in order
    items: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SummarizeParams {
    /// URI of a resource served by this server
    document_uri: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SentimentParams {
    /// Text to classify
    text: String,
}

/// Build the research server's registry.
pub fn research_registry(config: CatalogConfig) -> Result<CapabilityRegistry> {
    let item_delay = config.item_delay;
    let time_format = Arc::new(config.time_format);

    CapabilityRegistry::new()
        .with_tool(
            ToolDescriptor::typed("echo", |ctx: ServerCtx, p: EchoParams| async move {
                ctx.debug("Starting echo tool");
                ctx.info(format!("input message: {}", p.message));
                Ok(json!(format!("Echo: {}", p.message)))
            })
            .with_description("Return the given message unchanged"),
        )?
        .with_tool(
            ToolDescriptor::new(
                "get_current_time",
                Default::default(),
                move |ctx: ServerCtx, _args: Arguments| {
                    let time_format = time_format.clone();
                    async move { Ok(current_time(&ctx, &time_format)) }
                },
            )
            .with_description("Get the current local date and time"),
        )?
        .with_tool(
            ToolDescriptor::typed("process_items", move |ctx: ServerCtx, p: ProcessItemsParams| {
                process_items(ctx, p.items, item_delay)
            })
            .with_description("Process a list of items, reporting progress along the way"),
        )?
        .with_tool(
            ToolDescriptor::typed("summarize_document", |ctx: ServerCtx, p: SummarizeParams| async move {
                ctx.debug(format!("Summarizing document at {}", p.document_uri));
                let contents = ctx.read_resource(&p.document_uri).await?;
                let Some(document) = contents.first() else {
                    return Ok(json!("Document is empty"));
                };
                let words = document.text.split_whitespace().count();
                ctx.info(format!("Document has {words} words"));
                Ok(json!(summarize_text(&document.text)))
            })
            .with_description("Summarize a document by resource URI"),
        )?
        .with_tool(
            ToolDescriptor::typed("analyze_sentiment", |ctx: ServerCtx, p: SentimentParams| async move {
                let answer = ctx.sample(sentiment_prompt(&p.text)).await?;
                let sentiment = classify_sentiment(&answer);
                Ok(json!({ "text": p.text, "sentiment": sentiment }))
            })
            .with_description("Classify the sentiment of a text using the client's language model"),
        )?
        .with_resource(
            ResourceDescriptor::new("server_info", "info://server", |_ctx: ServerCtx, _req: ResourceRequest| async move {
                Ok(ResourceContent::Text(
                    "A research MCP server built with a minimal configuration.".to_string(),
                ))
            })?
            .with_description("Information about this server"),
        )?
        .with_resource(
            ResourceDescriptor::new("greeting", "greeting://{name}", |_ctx: ServerCtx, req: ResourceRequest| async move {
                Ok(ResourceContent::Text(format!(
                    "Hello, {}!",
                    req.param("name").unwrap_or_default()
                )))
            })?
            .with_description("A greeting for the given name"),
        )?
        .with_resource(
            ResourceDescriptor::new("config", "data://config", |_ctx: ServerCtx, _req: ResourceRequest| async move {
                Ok(ResourceContent::Json(json!({
                    "theme": "dark",
                    "version": "1.2.0",
                    "features": ["tools", "resources"],
                })))
            })?
            .with_description("Application configuration"),
        )?
        .with_prompt(
            PromptDescriptor::new("simple_prompt", |args: &Arguments| {
                let text = args.get_string("text").unwrap_or_default();
                Ok(vec![PromptMessage::user(format!(
                    "Think about the following text: {text}"
                ))])
            })
            .with_description("A simple prompt template")
            .with_argument("text", "Text to think about", true),
        )?
        .with_prompt(
            PromptDescriptor::new("get_google_news_search_prompt", |args: &Arguments| {
                let keyword = args.get_string("keyword").unwrap_or_default();
                Ok(vec![PromptMessage::user(format!("{keyword} -game -sports"))])
            })
            .with_description("Search query for Google News that leaves out games and sports")
            .with_argument("keyword", "Topic to search for", true),
        )?
        .with_prompt(
            PromptDescriptor::new("get_weather_prompt", |args: &Arguments| {
                let city = args.get_string("city").unwrap_or_default();
                Ok(vec![PromptMessage::user(format!(
                    "What is the weather like in {city}?"
                ))])
            })
            .with_description("Ask for the weather in a city")
            .with_argument("city", "City name", true),
        )?
        .with_prompt(
            PromptDescriptor::new("get_job_template_prompt", |_args: &Arguments| {
                Ok(vec![PromptMessage::user(JOB_TEMPLATE)])
            })
            .with_description("Step-by-step template for breaking down a job"),
        )
}

/// Format the local time with `pattern`. An invalid pattern only surfaces
/// while writing, so the failure is logged and reported as text.
fn current_time(ctx: &ServerCtx, pattern: &str) -> Value {
    ctx.debug("Fetching current time");
    let now = chrono::Local::now();
    let mut formatted = String::new();
    if write!(formatted, "{}", now.format(pattern)).is_err() {
        ctx.error(format!("Invalid time format '{pattern}'"));
        return json!("Failed to get the current time.");
    }
    ctx.info(format!("Current time: {formatted}"));
    json!(format!("Current time: {formatted}"))
}

async fn process_items(ctx: ServerCtx, items: Vec<String>, delay: Duration) -> Result<Value> {
    let total = items.len() as u64;
    let mut results = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        ctx.report_progress(i as u64, total)?;
        tokio::time::sleep(delay).await;
        results.push(item.to_uppercase());
    }
    ctx.report_progress(total, total)?;
    Ok(json!({ "processed": results.len(), "results": results }))
}

/// Summarize a document by length: short documents come back whole, longer
/// ones are cut after [`SUMMARY_WORD_LIMIT`] words.
pub fn summarize_text(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let total = words.len();
    if total > SUMMARY_WORD_LIMIT {
        format!(
            "Summary ({total} words total): {}...",
            words[..SUMMARY_WORD_LIMIT].join(" ")
        )
    } else {
        format!("Full document ({total} words): {text}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Positive => f.write_str("positive"),
            Sentiment::Negative => f.write_str("negative"),
            Sentiment::Neutral => f.write_str("neutral"),
        }
    }
}

/// Map a free-form model answer onto a sentiment. Anything that names
/// neither positive nor negative is neutral.
pub fn classify_sentiment(answer: &str) -> Sentiment {
    let answer = answer.trim().to_lowercase();
    if answer.contains("positive") {
        Sentiment::Positive
    } else if answer.contains("negative") {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

fn sentiment_prompt(text: &str) -> String {
    format!(
        "Classify the sentiment of the following text as positive, negative or neutral. \
         Answer with exactly one of the words \"positive\", \"negative\" or \"neutral\". \
         Text: {text}"
    )
}
