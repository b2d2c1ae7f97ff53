use std::process::ExitCode;

use clap::Parser;

use vstream::app::VstreamApp;
use vstream::cli::Args;
use vstream::logging;
use vstream_audio::CaptureSource;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_devices {
        return list_devices();
    }

    if let Err(e) = args.validate() {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = logging::init(&args.log_level) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!("vstream - Vosk-based Speech Recognition Server");
    tracing::info!("================================================");

    match VstreamApp::new(args).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {e}");
            eprintln!("Fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn list_devices() -> ExitCode {
    let devices = match CaptureSource::list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Available audio input devices:");
    println!("-----------------------------");
    for device in devices {
        println!("Device #{}: {}", device.index, device.name);
        println!("  Input channels: {}", device.max_channels);
        println!("  Default sample rate: {} Hz", device.default_sample_rate);
        if device.is_default {
            println!("  (Default input device)");
        }
        println!();
    }
    ExitCode::SUCCESS
}
