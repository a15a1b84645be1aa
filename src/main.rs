use clap::{Parser, Subcommand};
use imgate::{config, server};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup — trivial, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "imgate")]
#[command(about = "On-demand image transformation gateway")]
#[command(long_about = "\
On-demand image transformation gateway

Fetches a remote image, applies the requested transforms and returns the
re-encoded result:

  GET /img/url/{url}?w=&h=&rotate=&q=&format=&sharpen=&blur=&up=&strip=&webp=

Parameter aliases:
  w | width            target width in pixels (0-20000, 0 = unconstrained)
  h | height           target height in pixels (0-20000, 0 = unconstrained)
  r | rotate           clockwise degrees (0-360)
  q | quality          lossy quality (1-100)
  f | format           jpeg png webp heif tiff avif jp2k gif
  s | sharpen          unsharp mask amount (0-1)
  b | blur             gaussian sigma (0-1)
  up | upscale         allow enlarging (\"true\")
  strip                drop ICC profile (\"true\")
  webp                 force | auto

With no transform parameters the source bytes are passed through untouched.

Run 'imgate gen-config' to generate a documented imgate.toml.")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Config file (missing file = stock defaults)
        #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Override server.listen, e.g. 0.0.0.0:8080
        #[arg(long)]
        listen: Option<String>,
    },
    /// Print a stock imgate.toml with all options documented
    GenConfig,
    /// Load and validate a config file without serving
    CheckConfig {
        #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, listen } => {
            let config = load_serve_config(&config, listen)?;
            init_tracing(&config.log.filter);
            server::serve(config).await?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::CheckConfig { config } => {
            let resolved = config::load_config(&config)?;
            println!("==> {} is valid", config.display());
            println!("    listen:    {}", resolved.server.listen);
            println!("    max bytes: {}", resolved.fetch.max_bytes);
            println!("    max side:  {}", resolved.image.max_dimension);
            println!("    max px:    {}", resolved.image.max_pixels);
        }
    }

    Ok(())
}

fn load_serve_config(
    path: &Path,
    listen: Option<String>,
) -> Result<config::GatewayConfig, config::ConfigError> {
    let mut resolved = config::load_config(path)?;
    if let Some(listen) = listen {
        resolved.server.listen = listen;
        resolved.validate()?;
    }
    Ok(resolved)
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
