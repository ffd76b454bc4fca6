mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use classcast::config;
use classcast::conversion::{BatchTranscodeCoordinator, ClassAsset, ClassOutcome, CourseAssets, MemoryAssetStore};
use classcast::engine::Engine;
use classcast::server;
use classcast_av::{check_tools, ladder};
use classcast_common::{ClassId, CourseId};
use cli::{Cli, Commands};

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting classcast server");
    tracing::info!(
        videos_dir = ?config.storage.videos_dir,
        encoder_slots = config.transcode.encoder_slots,
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    let engine = Engine::from_config(config);
    let accel = engine.accel().await;
    tracing::info!(accel = %accel, "Hardware acceleration selected");

    server::start_server(engine).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "classcast=trace,classcast_av=debug,tower_http=debug".to_string()
        } else {
            "classcast=debug,classcast_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, config_path))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, config_path))
        }
        Commands::Plan { file, live } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(plan_file(&file, live, config_path))
        }
        Commands::Convert { course, classes } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(course, classes, config_path))
        }
        Commands::DetectAccel => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(detect_accel(config_path))
        }
        Commands::CheckTools => print_tools(),
        Commands::Validate {
            config: validate_path,
        } => validate_config(validate_path.as_deref().or(config_path)),
        Commands::Version => {
            println!("classcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    let engine = Engine::from_config(config::load_config_or_default(config_path)?);
    let source = engine.probe.probe_file(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&source)?);
    } else {
        println!("File: {}", file.display());
        println!("Video: {}x{} @ {} fps", source.width, source.height, source.fps);
        println!("Audio: {}", if source.has_audio { "yes" } else { "no" });
    }
    Ok(())
}

async fn plan_file(file: &Path, live: bool, config_path: Option<&Path>) -> Result<()> {
    let engine = Engine::from_config(config::load_config_or_default(config_path)?);
    let source = engine.probe.probe_file(file).await?;
    let accel = engine.accel().await;

    println!("Source: {}x{} @ {} fps, audio: {}", source.width, source.height, source.fps, source.has_audio);
    println!("Acceleration: {accel}");

    let rungs = ladder::plan(source.total_pixels(), source.fps);
    println!("\nLadder ({} renditions):", rungs.len());
    for rung in &rungs {
        println!(
            "  {:<14} {:>6} video, {:>5} audio, {} {}",
            rung.name(),
            rung.bitrate,
            rung.audio_bitrate,
            rung.profile,
            rung.level
        );
    }

    let command = engine
        .builder
        .build_with_ladder(&source, rungs, live, accel, &engine.settings)?;
    println!("\nCommand:\n  {}", command.display());
    Ok(())
}

async fn convert(course: String, classes: Vec<(String, std::path::PathBuf)>, config_path: Option<&Path>) -> Result<()> {
    let engine = Engine::from_config(config::load_config_or_default(config_path)?);
    let store = Arc::new(MemoryAssetStore::new());
    let coordinator = BatchTranscodeCoordinator::new(engine, store);

    let course = CourseAssets {
        course_id: CourseId::parse(&course)?,
        classes: classes
            .into_iter()
            .map(|(class_id, source_path)| -> Result<ClassAsset> {
                Ok(ClassAsset {
                    class_id: ClassId::parse(&class_id)?,
                    source_path,
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };

    let reports = coordinator.convert_all(course).await?;
    for report in &reports {
        match &report.outcome {
            ClassOutcome::Converted { manifest } => {
                println!("✓ class {}: {}", report.class_id, manifest.display())
            }
            ClassOutcome::Skipped { reason } => println!("- class {}: skipped ({reason})", report.class_id),
            ClassOutcome::Failed { error } => println!("✗ class {}: {error}", report.class_id),
        }
    }

    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, ClassOutcome::Failed { .. }))
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} classes failed", reports.len());
    }
    Ok(())
}

async fn detect_accel(config_path: Option<&Path>) -> Result<()> {
    let engine = Engine::from_config(config::load_config_or_default(config_path)?);
    let accel = engine.accel().await;
    println!("Acceleration: {accel}");
    println!("Video encoder: {}", accel.video_encoder());
    Ok(())
}

fn print_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = check_tools();
    let mut all_ok = true;

    for tool in &tools {
        // nvidia-smi only matters on NVIDIA hosts
        let required = tool.name != "nvidia-smi";
        let status = if tool.available {
            "✓"
        } else if required {
            all_ok = false;
            "✗"
        } else {
            "-"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Videos: {}", config.storage.videos_dir.display());
    println!("  Acceleration: {:?}", config.transcode.hw_accel);
    println!("  Encoder slots: {}", config.transcode.encoder_slots);
    println!("  Helper: {}", config.helper.program.display());
    Ok(())
}
