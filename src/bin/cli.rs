use anyhow::{anyhow, bail, Context};
use iris_link::capture::{decode_photo, encode_jpeg};
use iris_link::testing::synthetic_jpeg;
use iris_link::{
    CaptureOrchestrator, DebugLog, FrameUploader, IrisConfig, MockWearable, PhotoData,
    ServerEndpoints, WebRtcConnector,
};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "Usage: iris-link <command> [args]

Commands:
  endpoints <address> [--json]
  upload <address> <secret> <image-file>
  run [--config <file>] [--image <file>] [--interval <ms>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "endpoints" => cmd_endpoints(&args),
        "upload" => cmd_upload(&args).await,
        "run" => cmd_run(&args).await,
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

fn cmd_endpoints(args: &[String]) -> anyhow::Result<()> {
    let address = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: iris-link endpoints <address> [--json]"))?;
    let endpoints = ServerEndpoints::derive(address);

    if args.contains(&"--json".to_string()) {
        let json = serde_json::json!({
            "base": endpoints.base,
            "signaling": endpoints.signaling,
            "frame_upload": endpoints.frame_upload,
            "ice_servers": endpoints.ice_servers,
        });
        println!("{}", json);
    } else {
        println!("base:       {}", endpoints.base);
        println!("signaling:  {}", endpoints.signaling);
        println!("upload:     {}", endpoints.frame_upload);
        for server in &endpoints.ice_servers {
            println!("ice:        {}", server);
        }
    }
    Ok(())
}

async fn cmd_upload(args: &[String]) -> anyhow::Result<()> {
    if args.len() < 5 {
        bail!("Usage: iris-link upload <address> <secret> <image-file>");
    }
    iris_link::init_logging();

    let (address, secret, file) = (&args[2], &args[3], &args[4]);
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file))?;

    let image = decode_photo(PhotoData::Encoded(bytes))?;
    let jpeg = encode_jpeg(&image, IrisConfig::default().capture.jpeg_quality)?;
    println!("Uploading {}x{} ({} bytes)", image.width(), image.height(), jpeg.len());

    if secret.trim().is_empty() {
        bail!("shared secret must not be empty");
    }
    let uploader = FrameUploader::new(DebugLog::new());
    let url = iris_link::endpoints::frame_upload_url(address);
    let frame_id = uploader.post_frame(&url, secret.trim(), jpeg).await?;
    println!("Uploaded frame {}", frame_id);
    Ok(())
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    // Parse args: run [--config <file>] [--image <file>] [--interval <ms>]
    let mut config_path: Option<PathBuf> = None;
    let mut image_path: Option<PathBuf> = None;
    let mut interval_ms: Option<u64> = None;

    let mut i = 2;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--config" => config_path = Some(PathBuf::from(value()?)),
            "--image" => image_path = Some(PathBuf::from(value()?)),
            "--interval" => interval_ms = Some(value()?.parse()?),
            other => bail!("Unknown option: {}", other),
        }
        i += 2;
    }

    let config = IrisConfig::load_layered(config_path.as_deref())?;
    iris_link::init_logging_with(&config.logging.filter);
    if config.server.shared_secret.trim().is_empty() {
        log::warn!("No shared secret configured; set IRIS_SERVER__SHARED_SECRET");
    }

    let photo = match &image_path {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => synthetic_jpeg(640, 480, None),
    };
    let wearable = MockWearable::streaming();
    wearable.set_captured_photo(PhotoData::Encoded(photo));

    let log = DebugLog::new();
    let orchestrator =
        CaptureOrchestrator::new(Arc::new(wearable), Arc::new(WebRtcConnector::new()), log.clone());
    orchestrator.set_jpeg_quality(config.capture.jpeg_quality);
    orchestrator
        .start(&config.server.base_url, &config.server.shared_secret)
        .await?;

    let requested = interval_ms.map(Duration::from_millis);
    match config.capture.startup_auto_capture(requested) {
        Some(interval) => {
            let interval = orchestrator.set_auto_capture_interval(interval);
            orchestrator.start_auto_capture(interval);
            println!(
                "Streaming to {} (auto-capture every {} ms), Ctrl-C to stop",
                config.server.base_url,
                interval.as_millis()
            );
        }
        None => println!(
            "Streaming to {} (auto-capture off), Ctrl-C to stop",
            config.server.base_url
        ),
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        if shutdown_handler.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })?;

    while !shutdown.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    orchestrator.stop().await;
    println!("{}", log.to_text());
    Ok(())
}
