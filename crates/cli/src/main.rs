//! `promptdeck` -- generate images from the terminal.
//!
//! Prompts for positive and negative text, submits the job to ComfyUI,
//! prints progress in 10 % steps and saves every produced image.
//!
//! # Environment variables
//!
//! | Variable                  | Default          | Description                          |
//! |---------------------------|------------------|--------------------------------------|
//! | `COMFYUI_SERVER_ADDRESS`  | `localhost:8188` | `host:port` of the ComfyUI server    |
//! | `WORKFLOW_PATH`           | `workflow.json`  | API-format workflow template         |
//! | `TEMPLATE_RELOAD`         | `false`          | Re-read the template for every job   |
//! | `GENERATION_TIMEOUT_SECS` | `600`            | Give up after this long (`0` = never)|
//! | `OUTPUT_DIR`              | `outputs`        | Where images are written             |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use promptdeck_comfyui::transport::{ComfyUITransport, Transport};
use promptdeck_core::config::BackendConfig;
use promptdeck_core::params::GenerationParams;
use promptdeck_core::template::TemplateStore;
use promptdeck_pipeline::{GenerateOptions, Orchestrator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use promptdeck_cli::narrator::ConsoleNarrator;
use promptdeck_cli::output::{save_artifacts, DEFAULT_OUTPUT_DIR};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptdeck_cli=info,promptdeck_pipeline=warn,promptdeck_comfyui=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BackendConfig::from_env().context("Invalid configuration")?;
    let output_dir = std::env::var("OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR));

    let templates = TemplateStore::open(config.workflow_path.clone(), config.template_reload)
        .context("Failed to load workflow template")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let positive = prompt(&mut lines, "Enter the positive prompt: ").await?;
    let negative = prompt(&mut lines, "Enter the negative prompt: ").await?;

    let transport = Arc::new(ComfyUITransport::from_config(&config));
    let backend: Arc<dyn Transport> = transport.clone();
    let orchestrator =
        Orchestrator::new(backend, templates).with_default_timeout(config.generation_timeout);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let options = GenerateOptions::default()
        .with_observer(Arc::new(ConsoleNarrator::stdout()))
        .with_cancel(cancel);
    let params = GenerationParams::new(positive, negative);

    let result = orchestrator.generate_with(&params, options).await;
    transport.shutdown().await;
    let output = result.context("Image generation failed")?;
    println!("Execution complete.");

    for path in save_artifacts(&output_dir, &output).await? {
        println!("Image saved as {}", path.display());
    }
    Ok(())
}

async fn prompt<R>(lines: &mut tokio::io::Lines<R>, label: &str) -> anyhow::Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    let line = lines
        .next_line()
        .await?
        .context("stdin closed before a prompt was entered")?;
    Ok(line.trim().to_string())
}
