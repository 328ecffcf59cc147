use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vision_describe::{
    Credentials, DescriberConfig, PrepareOptions, Provider, ResizeStrategy, MONTAGE_PROMPT,
    SCENE_BRIEF_PROMPT,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Scale both edges by --shrink-ratio each pass
    Proportional,
    /// Halve both edges each pass
    Halve,
}

/// Describe a local image with a vision-capable LLM API.
///
/// API keys are read from OPENAI_API_KEY, ANTHROPIC_API_KEY and DEEPSEEK_API_KEY.
#[derive(Debug, Parser)]
#[command(name = "describe-image", version)]
struct Args {
    /// Image to describe (jpg, jpeg, png, webp, gif)
    image: PathBuf,

    /// Custom prompt (defaults to a detailed description with a JSON entities block)
    #[arg(long, conflicts_with_all = ["scene_brief", "montage"])]
    prompt: Option<String>,

    /// Use the compact one-paragraph scene brief prompt
    #[arg(long, conflicts_with = "montage")]
    scene_brief: bool,

    /// Use the montage reading prompt (paragraph plus mermaid diagram)
    #[arg(long)]
    montage: bool,

    /// Providers to try (openai, anthropic, deepseek). Defaults to all.
    /// Vision providers always go before metadata-only ones; within each
    /// group the given order is kept.
    #[arg(long = "provider", value_name = "NAME")]
    providers: Vec<String>,

    /// Maximum width or height in pixels
    #[arg(long, default_value_t = 2048)]
    max_edge: u32,

    /// Maximum encoded image size in bytes
    #[arg(long, default_value_t = 20 * 1024 * 1024)]
    max_bytes: u64,

    #[arg(long, value_enum, default_value_t = Strategy::Proportional)]
    strategy: Strategy,

    /// Edge multiplier per pass for the proportional strategy
    #[arg(long, default_value_t = 0.8)]
    shrink_ratio: f32,

    /// Shrink passes allowed before giving up
    #[arg(long, default_value_t = 8)]
    max_retries: u32,

    /// Print only the extracted JSON block
    #[arg(long)]
    raw_json: bool,
}

fn build_config(args: &Args) -> Result<DescriberConfig, String> {
    let mut config = DescriberConfig::default();

    if !args.providers.is_empty() {
        config.providers = args
            .providers
            .iter()
            .map(|name| Provider::preset(name).ok_or_else(|| format!("Unknown provider '{name}'")))
            .collect::<Result<_, _>>()?;
    }

    let strategy = match args.strategy {
        Strategy::Proportional => ResizeStrategy::Proportional(args.shrink_ratio),
        Strategy::Halve => ResizeStrategy::Halve,
    };
    config.prepare = PrepareOptions::default()
        .max_pixel_edge(args.max_edge)
        .max_bytes(args.max_bytes)
        .strategy(strategy)
        .max_retries(args.max_retries);

    if let Some(prompt) = &args.prompt {
        config.prompt = Some(prompt.clone());
    } else if args.scene_brief {
        config.prompt = Some(SCENE_BRIEF_PROMPT.to_string());
    } else if args.montage {
        config.prompt = Some(MONTAGE_PROMPT.to_string());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::from(2);
        }
    };
    // Failures resurface with full context from the analysis below.
    if let Ok(asset) = vision_describe::inspect(&args.image) {
        info!(
            file = %asset.file_name(),
            format = asset.kind.name(),
            width = asset.width,
            height = asset.height,
            bytes = asset.byte_size,
            "source image"
        );
    }

    let credentials = Credentials::from_env();
    let client = reqwest::Client::new();

    let response = match vision_describe::analyze_with_fallback(
        &client,
        &config,
        &args.image,
        None,
        &credentials,
    )
    .await
    {
        Ok(response) => response,
        Err(error) => {
            eprintln!("Error: {error}");
            return ExitCode::FAILURE;
        }
    };

    if args.raw_json {
        match &response.structured {
            Some(block) => println!("{block:#}"),
            None => {
                eprintln!("No JSON block found in the response");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("{}", response.content);
    if let Some(block) = &response.structured {
        println!("\n{block:#}");
    }
    eprintln!(
        "\nprovider: {}  model: {}  tokens: {}",
        response.provider,
        response.model,
        response
            .usage
            .map(|u| u.total_tokens.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );

    ExitCode::SUCCESS
}
