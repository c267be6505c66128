use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use explorer_rs::config::{load_config_or_default, AppConfig};
use explorer_rs::observability::init_tracing;
use explorer_rs::protocol::{ApiFlavor, Operation};
use explorer_rs::{Explorer, ExplorerSnapshot, Outcome, RequestPreset};

const EXIT_ERROR: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

/// Send one request to an Ollama or OpenAI-compatible endpoint and stream
/// the reply to stdout. Ctrl-C stops the request and keeps partial output.
#[derive(Debug, Parser)]
#[command(name = "explorer", version)]
struct Cli {
    /// YAML config file; built-in defaults are used when it does not exist.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[arg(long)]
    base_url: Option<String>,
    /// ollama | openai
    #[arg(long)]
    flavor: Option<ApiFlavor>,
    /// chat | completion | embeddings | models | any other endpoint name
    #[arg(long)]
    operation: Option<Operation>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, conflicts_with = "no_stream")]
    stream: bool,
    #[arg(long)]
    no_stream: bool,
    /// Send this JSON body instead of the generated one.
    #[arg(long)]
    body: Option<String>,
    #[arg(long, env = "EXPLORER_API_KEY")]
    api_key: Option<String>,
    /// Print response headers after the reply.
    #[arg(long)]
    show_headers: bool,
    /// Print the raw response body instead of the extracted preview.
    #[arg(long)]
    raw: bool,
    /// Print the request body and exit without sending.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config_or_default(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level, &config.features.log_format);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(run(cli, config))
}

fn preset_from_cli(cli: &Cli, base: &RequestPreset) -> RequestPreset {
    let mut preset = base.clone();
    if let Some(flavor) = cli.flavor {
        preset.api_flavor = flavor;
    }
    if let Some(operation) = &cli.operation {
        preset.operation = operation.clone();
    }
    if let Some(model) = &cli.model {
        preset.model.clone_from(model);
    }
    if cli.stream {
        preset.stream = true;
    } else if cli.no_stream {
        preset.stream = false;
    }
    preset
}

async fn run(cli: Cli, config: AppConfig) -> ExitCode {
    let explorer = Explorer::new(&config);
    if let Some(base_url) = &cli.base_url {
        explorer.update_base_url(base_url.as_str());
    }
    if cli.api_key.is_some() {
        explorer.set_api_key(cli.api_key.clone());
    }
    explorer.update_request_body(preset_from_cli(&cli, &config.explorer.preset));
    if let Some(body) = &cli.body {
        explorer.set_request_body_manual(body.as_str());
    }

    let snapshot = explorer.snapshot();
    if cli.dry_run {
        println!("{}", snapshot.request_body);
        return ExitCode::SUCCESS;
    }
    tracing::info!(
        base_url = %snapshot.base_url,
        flavor = %snapshot.preset.api_flavor,
        operation = %snapshot.preset.operation,
        model = %snapshot.preset.model,
        "sending request"
    );

    let mut revisions = explorer.subscribe();
    let sender = explorer.clone();
    let mut send = tokio::spawn(async move { sender.send_request().await });
    let mut printed = 0usize;
    let mut watch_ctrl_c = true;
    let mut live_preview = !cli.raw;

    loop {
        tokio::select! {
            joined = &mut send => {
                if let Err(err) = joined {
                    eprintln!("request task failed: {err}");
                    return ExitCode::from(EXIT_ERROR);
                }
                break;
            }
            changed = revisions.changed(), if live_preview => {
                if changed.is_ok() {
                    let snapshot = explorer.snapshot();
                    let mut stdout = std::io::stdout().lock();
                    if let Err(err) = write_new_preview(&mut stdout, &snapshot, &mut printed) {
                        tracing::debug!(error = %err, "stdout closed, stopping request");
                        live_preview = false;
                        explorer.stop_request();
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if watch_ctrl_c => {
                match signal {
                    Ok(()) => {
                        explorer.stop_request();
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "cannot listen for Ctrl-C");
                        watch_ctrl_c = false;
                    }
                }
            }
        }
    }

    let snapshot = explorer.snapshot();
    if cli.raw {
        println!("{}", snapshot.response_body);
    } else if live_preview {
        let mut stdout = std::io::stdout().lock();
        let flushed = write_new_preview(&mut stdout, &snapshot, &mut printed)
            .and_then(|()| writeln!(stdout));
        if let Err(err) = flushed {
            tracing::debug!(error = %err, "stdout closed before the preview was written");
        }
    }
    if cli.show_headers {
        eprintln!("{}", snapshot.response_headers);
    }
    report_status(&snapshot)
}

/// Write the part of the preview not yet printed. `printed` only advances
/// once the tail is written and flushed.
fn write_new_preview<W: Write>(
    out: &mut W,
    snapshot: &ExplorerSnapshot,
    printed: &mut usize,
) -> std::io::Result<()> {
    let preview = if snapshot.response_preview.is_empty() && snapshot.status.is_some() {
        snapshot.response_body.as_str()
    } else {
        snapshot.response_preview.as_str()
    };
    let Some(tail) = preview.get(*printed..) else {
        return Ok(());
    };
    if tail.is_empty() {
        return Ok(());
    }
    out.write_all(tail.as_bytes())?;
    out.flush()?;
    *printed = preview.len();
    Ok(())
}

fn report_status(snapshot: &ExplorerSnapshot) -> ExitCode {
    let Some(status) = &snapshot.status else {
        eprintln!("request finished without a status");
        return ExitCode::from(EXIT_ERROR);
    };
    let mut line = format!(
        "{} {} | {:?} | {} ms",
        status.http_status, status.status_text, status.outcome, status.request_time_ms
    );
    if let Some(ttfb) = status.time_to_first_byte_ms {
        line.push_str(&format!(" | first byte {ttfb} ms"));
    }
    if let Some(ttft) = status.time_to_first_token_ms {
        line.push_str(&format!(" | first token {ttft} ms"));
    }
    if let Some(streaming) = status.total_streaming_time_ms {
        line.push_str(&format!(" | streaming {streaming} ms"));
    }
    eprintln!("{line}");
    if let Some(message) = &status.message {
        eprintln!("{message}");
    }

    match status.outcome {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::Error => ExitCode::from(EXIT_ERROR),
        Outcome::Cancelled => ExitCode::from(EXIT_CANCELLED),
    }
}
