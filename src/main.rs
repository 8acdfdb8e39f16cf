use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use devroute::{
    DevServer,
    adapters::FsProjectFiles,
    config::{DevServerConfig, DevServerConfigValidator, loader::load_config_or_default},
    core::{RouteManifestBuilder, manifest::RouteKind},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "devroute.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "devroute.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "devroute.toml")]
        config: String,
    },
    /// Print the route manifest in match order
    Routes {
        /// Configuration file to use
        #[clap(short, long, default_value = "devroute.toml")]
        config: String,
    },
    /// Start the dev server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "devroute.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Routes { config }) => routes_command(&config),
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

fn load_validated(config_path: &str) -> Result<DevServerConfig> {
    let config = load_config_or_default(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    DevServerConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

async fn serve_command(config_path: &str) -> Result<()> {
    let config = load_validated(config_path)?;
    tracing_setup::init_tracing(&config.logging)?;
    tracing::info!("Loaded configuration from {config_path}");

    let server = DevServer::new(config).await?;

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    server.serve(shutdown).await
}

/// Print the routes the current project files produce
fn routes_command(config_path: &str) -> Result<()> {
    let config = load_validated(config_path)?;
    let files = FsProjectFiles::new(config.root.clone(), config.pages_dir.clone());
    let manifest = RouteManifestBuilder::from_config(&config)
        .build(&files, 1)
        .context("Failed to build route manifest")?;

    if manifest.is_empty() {
        println!("No routes found under {}", config.pages_root().display());
        return Ok(());
    }

    println!("{:<32} {:<9} {:<10} component", "route", "kind", "prerender");
    for route in manifest.routes() {
        let kind = match route.kind {
            RouteKind::Page => "page",
            RouteKind::Endpoint => "endpoint",
        };
        println!(
            "{:<32} {:<9} {:<10} {}",
            route.route,
            kind,
            route.prerender,
            route.component.display()
        );
    }
    Ok(())
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    use devroute::config::loader::load_config_sync;

    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config_sync(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match DevServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Pages: {}", config.pages_root().display());
            println!("   • Base: {}", config.base);
            println!("   • Output: {:?}", config.output);
            println!("   • Renderers: {}", config.renderers.join(", "));
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Base paths start with '/' and contain no '..' segments");
            println!("   • Site URLs start with http:// or https://");
            println!("   • Verify listen address format (e.g., '127.0.0.1:4321')");
            println!("   • Extensions are listed without a leading dot");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# devroute configuration

# The address to listen on
listen_addr = "127.0.0.1:4321"

# Project root and the pages directory inside it
root = "."
pages_dir = "src/pages"

# Mount the site under a sub-path, e.g. "/docs"
base = "/"

# Public origin, joined with `base`
# site = "https://example.com"

# static | server | hybrid
output = "static"

compress_html = true
streaming = true
renderers = ["html"]

[client_directives]
# idle = "/directives/idle.js"

[watch]
queue_capacity = 256
ignore = [".git", "node_modules", "target"]

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'devroute serve --config {config_path}' to start the server");
    Ok(())
}
