use std::sync::Arc;

use clap::Parser;
use research_mcp::{
    research::{report_instructions, OpenAiResearchModel, ResearchClientConn, ResearchConfig},
    ChatController, ClientOrchestrator, Error, FailurePolicy, OrchestratorConfig, Result,
    RunReport, TransportConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Research assistant client", long_about = None)]
struct Args {
    /// Connect to a running server at tcp://host:port instead of spawning one
    #[arg(long, env = "RESEARCH_SERVER_URL")]
    server_url: Option<String>,

    /// Server program to spawn over stdio
    #[arg(long, default_value = "research-server")]
    server_cmd: String,

    /// Arguments passed to the spawned server
    #[arg(last = true)]
    server_args: Vec<String>,

    /// Skip the rest of the check after the first failing call
    #[arg(long)]
    abort_on_failure: bool,

    /// Run the check and exit without starting the chat
    #[arg(long)]
    no_chat: bool,
}

impl Args {
    fn orchestrator_config(&self) -> OrchestratorConfig {
        let transport = match &self.server_url {
            Some(url) => TransportConfig::Tcp { url: url.clone() },
            None => TransportConfig::Process {
                program: self.server_cmd.clone(),
                args: self.server_args.clone(),
            },
        };
        let policy = if self.abort_on_failure {
            FailurePolicy::AbortRemaining
        } else {
            FailurePolicy::Continue
        };
        OrchestratorConfig::new(transport).with_failure_policy(policy)
    }
}

fn print_report(report: &RunReport) {
    if let Some(server) = &report.server {
        println!("Connected to {} {}", server.name, server.version);
    }
    let names = |items: Vec<&str>| items.join(", ");
    println!("Tools: {}", names(report.state.tools.iter().map(|t| t.name.as_str()).collect()));
    println!(
        "Resources: {}",
        names(report.state.resources.iter().map(|r| r.uri.as_str()).collect())
    );
    println!(
        "Resource templates: {}",
        names(
            report
                .state
                .resource_templates
                .iter()
                .map(|t| t.uri_template.as_str())
                .collect()
        )
    );
    println!("Prompts: {}", names(report.state.prompts.iter().map(|p| p.name.as_str()).collect()));
    for (step, e) in &report.discovery_errors {
        println!("{step} failed: {e}");
    }
    for call in &report.calls {
        println!("{call}");
    }
    println!("Background instruction: {}", report.state.background_instruction());
}

async fn run_check(config: &OrchestratorConfig, conn: &ResearchClientConn) -> Result<RunReport> {
    let mut orchestrator = ClientOrchestrator::with_connection(config.clone(), conn.clone());
    let report = tokio::select! {
        report = orchestrator.run() => report?,
        _ = tokio::signal::ctrl_c() => {
            return Err(Error::Cancelled("check interrupted".into()));
        }
    };
    print_report(&report);
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let model = match ResearchConfig::from_env() {
        Ok(config) => Some(Arc::new(OpenAiResearchModel::new(config))),
        Err(e) => {
            warn!("{}; sampling and chat are disabled", e);
            None
        }
    };
    let conn = ResearchClientConn::new(model.clone());
    let config = args.orchestrator_config();

    let report = run_check(&config, &conn).await?;
    let Some(model) = model.filter(|_| !args.no_chat) else {
        return Ok(());
    };

    let today = chrono::Local::now().date_naive();
    let mut chat = ChatController::new((*model).clone(), report.state.background_instruction())
        .with_instructions(report_instructions(today));
    chat.record_check(&report.calls);

    println!("Ask a research question (/check to rerun the check, /quit to exit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/check" => match run_check(&config, &conn).await {
                Ok(report) => chat.record_check(&report.calls),
                Err(e) => println!("Check failed: {e}"),
            },
            question => match chat.submit(question).await {
                Ok(answer) => println!("{answer}"),
                Err(e) => println!("Research request failed: {e}"),
            },
        }
    }
    info!("Chat finished after {} turns", chat.state().turns().len());
    Ok(())
}
