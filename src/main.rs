mod cli;

use webpforge::{report, runner};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConvertArgs};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use wf_codec::{CodecAdapter, FfmpegCodec, ToolRegistry};
use wf_core::config;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "webpforge=trace,wf_queue=trace,wf_codec=debug,wf_core=debug".to_string()
        } else {
            "webpforge=info,wf_queue=info,wf_codec=info,wf_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<wf_core::Error>()
                .map(wf_core::Error::exit_code)
                .unwrap_or(1);
            exit_code(code)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Convert(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(args, cli.config.as_deref()))
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Defaults => {
            print!("{}", config::Config::default().to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn convert(args: ConvertArgs, config_path: Option<&Path>) -> Result<ExitCode> {
    let config = config::load_config_or_default(config_path)?;

    let options = runner::RunOptions {
        overrides: args.settings_patch(),
        inputs: args.inputs,
        concurrency: args.concurrency,
        output_dir: args.output_dir,
    };

    let batch = runner::convert(&config, options)
        .await
        .context("Conversion run failed")?;

    if args.json {
        println!("{}", report::json_records(&batch.results)?);
    } else {
        println!("{}", report::summary_table(&batch.results));
        if batch.not_started > 0 {
            println!("{} not started", batch.not_started);
        }
        if batch.interrupted {
            println!("Interrupted: {} queued files skipped", batch.removed);
        }
        if let Some(ref fault) = batch.fault {
            println!("Stopped: codec adapter unavailable ({fault})");
        }
    }

    Ok(exit_code(batch.exit_code()))
}

async fn check_tools(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let registry = Arc::new(ToolRegistry::discover(&config.tools));
    let mut all_ok = true;

    for tool in registry.check_all().await {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    let codec = FfmpegCodec::new(registry);
    match codec.check().await {
        Ok(()) => println!("✓ libwebp encoder"),
        Err(e) => {
            all_ok = false;
            println!("✗ libwebp encoder: {e}");
        }
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Install ffmpeg with libwebp support to enable conversion.");
        Ok(exit_code(wf_core::Error::AdapterUnavailable(String::new()).exit_code()))
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, searching default locations");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  Concurrency: {}", config.queue.concurrency);
    println!("  Output extension: {}", config.output.extension);
    match &config.output.directory {
        Some(dir) => println!("  Output directory: {}", dir.display()),
        None => println!("  Output directory: next to each input"),
    }
    match &config.tools.ffmpeg_path {
        Some(ffmpeg) => println!("  ffmpeg: {}", ffmpeg.display()),
        None => println!("  ffmpeg: from PATH"),
    }
    println!("\n[settings]");
    let s = &config.settings;
    println!("  fps = {}", s.fps);
    println!("  max_dimension = {}", s.max_dimension);
    println!("  max_frames = {}", s.max_frames);
    println!("  quality = {}", s.quality);
    println!("  compression_level = {}", s.compression_level);
    println!("  overwrite = {}", s.overwrite);
    println!("  skip_frames = {}", s.skip_frames);

    Ok(())
}
