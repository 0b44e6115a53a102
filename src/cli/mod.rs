use anyhow::Result;
use console::style;
use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::error::SmithError;
use crate::core::llm::client::ChatClient;
use crate::core::models::ScrapeRequest;
use crate::core::orchestrator::generator::PlanGenerator;
use crate::core::orchestrator::shaper::DataShaper;
use crate::core::orchestrator::{Pipeline, PublishOutcome};
use crate::core::registry::EndpointRegistry;
use crate::core::sandbox::SandboxExecutor;
use crate::core::store::DataStore;
use crate::interfaces::web::ApiServer;

fn print_help() {
    println!("\n {} — natural language in, JSON endpoint out\n", style("apismith").green().bold());
    println!(" {}", style("Commands").bold());
    println!("   serve                      Start the endpoint server");
    println!("   create <description>       Generate, scrape, shape and publish an endpoint");
    println!("       --url <url>            Target URL (repeatable)");
    println!("       --fields <list>        Comma- or newline-separated field names");
    println!("       --template <json>      JSON object template for the response");
    println!("       --frequency <text>     Intended update frequency");
    println!("   list                       List registered endpoints");
    println!("   delete <endpoint_id>       Remove an endpoint");
    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("apismith").green()
    );
}

fn print_smith_error(err: &SmithError) {
    eprintln!(
        "\n {} [{}] {}",
        style("error").red().bold(),
        style(err.label()).yellow(),
        err
    );
    eprintln!("   {} {}\n", style("hint:").dim(), err.remediation());
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "serve" => serve().await,
        "create" => create(&args[2..]).await,
        "list" => list().await,
        "delete" => delete(&args[2..]).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    }
}

async fn serve() -> Result<()> {
    crate::logging::init();
    let config = load_config()?;

    let store = DataStore::open(&config.db_path).await.map_err(exitable)?;
    let server = ApiServer::bind(&config.server.host, config.server.port)
        .await
        .map_err(exitable)?;
    let registry = Arc::new(EndpointRegistry::new(store, server.base_url()));

    println!(
        "\n {} serving at {}",
        style("apismith").green().bold(),
        style(server.base_url()).cyan()
    );
    println!("   health:    GET /health");
    println!("   data:      GET /api/data/{{endpoint_id}}");
    println!("   endpoints: GET /api/endpoints\n");

    server.serve(registry);
    tokio::signal::ctrl_c().await?;
    println!("\n stopped");
    Ok(())
}

async fn create(args: &[String]) -> Result<()> {
    crate::logging::init();
    let request = match parse_create_args(args) {
        Ok(request) => request,
        Err(message) => {
            eprintln!("{message}");
            print_help();
            std::process::exit(2);
        }
    };

    let config = load_config()?;

    let store = DataStore::open(&config.db_path).await.map_err(exitable)?;
    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let registry = Arc::new(EndpointRegistry::new(store, base_url));

    let chat = Arc::new(ChatClient::new(&config.llm).map_err(exitable)?);
    let generator = PlanGenerator::new(chat.clone(), &config.llm, &config.scraping);
    let executor = SandboxExecutor::new(&config.scraping).map_err(exitable)?;
    let shaper = DataShaper::new(chat, &config.llm);
    let pipeline = Pipeline::new(
        generator,
        executor,
        shaper,
        registry,
        config.scraping.execution_timeout,
    );

    match pipeline.generate_and_publish(&request).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(err) => {
            print_smith_error(&err);
            std::process::exit(1);
        }
    }
}

async fn list() -> Result<()> {
    let config = load_config()?;
    let store = DataStore::open(&config.db_path).await.map_err(exitable)?;
    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let registry = EndpointRegistry::new(store, base_url);

    let endpoints = registry.list().await.map_err(exitable)?;
    if endpoints.is_empty() {
        println!("No endpoints registered yet.");
        return Ok(());
    }

    println!();
    for endpoint in endpoints {
        println!(
            " {}  {} records  {}",
            style(&endpoint.endpoint_id).green(),
            endpoint.records_count,
            style(&endpoint.access_url).cyan()
        );
        println!(
            "   {}  created {}",
            endpoint.description,
            endpoint.created_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    println!();
    Ok(())
}

async fn delete(args: &[String]) -> Result<()> {
    let Some(endpoint_id) = args.first() else {
        eprintln!("Usage: apismith delete <endpoint_id>");
        std::process::exit(2);
    };

    let config = load_config()?;
    let store = DataStore::open(&config.db_path).await.map_err(exitable)?;
    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let registry = EndpointRegistry::new(store, base_url);

    if registry.delete(endpoint_id).await.map_err(exitable)? {
        println!("Deleted {endpoint_id}");
    } else {
        eprintln!("No endpoint named {endpoint_id}");
        std::process::exit(1);
    }
    Ok(())
}

fn load_config() -> Result<AppConfig> {
    match AppConfig::from_env() {
        Ok(config) => Ok(config),
        Err(err) => {
            print_smith_error(&err);
            std::process::exit(1);
        }
    }
}

fn exitable(err: SmithError) -> anyhow::Error {
    anyhow::anyhow!("{err}")
}

fn parse_create_args(args: &[String]) -> Result<ScrapeRequest, String> {
    let mut description = String::new();
    let mut request = ScrapeRequest::new("");
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--url" | "-u" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "--url needs a value".to_string())?;
                request.target_urls.push(value.clone());
                i += 2;
            }
            "--fields" | "-f" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "--fields needs a value".to_string())?;
                request.desired_fields = ScrapeRequest::parse_fields(value);
                i += 2;
            }
            "--template" | "-t" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "--template needs a value".to_string())?;
                let template: serde_json::Value = serde_json::from_str(value)
                    .map_err(|e| format!("--template is not valid JSON: {e}"))?;
                request.response_template = Some(template);
                i += 2;
            }
            "--frequency" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| "--frequency needs a value".to_string())?;
                request.update_frequency = value.clone();
                i += 2;
            }
            flag if flag.starts_with('-') => {
                return Err(format!("Unknown option: {flag}"));
            }
            positional => {
                if !description.is_empty() {
                    description.push(' ');
                }
                description.push_str(positional);
                i += 1;
            }
        }
    }

    if description.trim().is_empty() {
        return Err("create needs a description".to_string());
    }
    request.description = description;
    Ok(request)
}

fn print_outcome(outcome: &PublishOutcome) {
    let execution = &outcome.execution;
    let status = if execution.per_source.iter().all(|s| s.ok) {
        style("SUCCESS").green().bold()
    } else {
        style("PARTIAL SUCCESS").yellow().bold()
    };

    println!("\n {} {}", style("scrape:").bold(), status);
    println!(
        "   records {}  filtered {}  duplicates {}  in {}ms",
        execution.meta.total_count,
        execution.meta.filtered_count,
        execution.meta.duplicate_count,
        execution.elapsed_ms
    );
    for source in &execution.per_source {
        let mark = if source.ok {
            style("ok ").green()
        } else {
            style("err").red()
        };
        match &source.error {
            Some(error) => println!("   [{mark}] {}  {}", source.url, style(error).dim()),
            None => println!("   [{mark}] {}  {} records", source.url, source.record_count),
        }
    }

    println!(
        "\n {} {} records as {}",
        style("shaped:").bold(),
        outcome.parsed.meta.records_parsed,
        outcome.parsed.meta.fields_extracted.join(", ")
    );

    println!(
        "\n {} {}",
        style("published:").bold(),
        style(&outcome.endpoint.access_url).cyan().underlined()
    );
    println!(
        "   run {} to serve it\n",
        style("apismith serve").green()
    );
}
