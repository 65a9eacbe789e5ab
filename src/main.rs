// Demo runner for the `damage_scan` library: scans one photo, prints progress
// events as they arrive and the final report as JSON.
//
//   damage_scan <image> [--class passenger|light|heavy] [--select x,y,w,h]
//               [--config file.json] [--immediate] [--annotate out.png]
//
// Ctrl-C cancels the scan in flight.

use anyhow::{Context, Result, bail};
use clap::Parser;
use damage_scan::core_modules::estimate::VehicleClass;
use damage_scan::core_modules::pixel_grid::{self, mime_from_extension};
use damage_scan::core_modules::region::SelectionRect;
use damage_scan::core_modules::utils::image_helper::image_helper::{annotate, save_png};
use damage_scan::{PipelineConfig, ScanEvent, ScanOutcome, ScanPipeline};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Scans one vehicle photo and prints the damage report.
#[derive(Parser, Debug)]
#[command(name = "damage_scan")]
#[command(about = "Staged vehicle-damage scan of a single JPEG or PNG photo")]
struct Args {
    /// Photo to scan; the image type is taken from the file extension.
    image: PathBuf,

    /// Vehicle class: passenger, light or heavy.
    #[arg(long = "class", default_value = "passenger", value_parser = parse_vehicle_class)]
    vehicle_class: VehicleClass,

    /// Region to analyse as normalized x,y,w,h. The whole image when absent.
    #[arg(long = "select", value_parser = parse_selection)]
    selection: Option<SelectionRect>,

    /// JSON pipeline configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip all pacing delays.
    #[arg(long)]
    immediate: bool,

    /// Write a copy of the photo with detection boxes outlined.
    #[arg(long)]
    annotate: Option<PathBuf>,
}

fn parse_vehicle_class(text: &str) -> Result<VehicleClass, String> {
    text.parse()
}

fn parse_selection(text: &str) -> Result<SelectionRect> {
    let values = text
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("selection '{text}' is not four numbers"))?;
    let [x, y, width, height] = values[..] else {
        bail!("selection '{text}' must be x,y,w,h");
    };
    let selection = SelectionRect::new(x, y, width, height);
    selection.validate()?;
    Ok(selection)
}

fn describe(event: &ScanEvent) -> String {
    match event {
        ScanEvent::StageChanged { token, stage } => format!("[{token}] stage -> {stage}"),
        ScanEvent::StepCompleted {
            token,
            step,
            log_message,
        } => format!("[{token}] {}: {log_message}", step.key()),
        ScanEvent::Finished { token, report } => format!(
            "[{token}] done: severity {} total {:.2} (confidence {})",
            report.severity, report.estimate.total, report.estimate.confidence
        ),
        ScanEvent::Failed { token, message } => format!("[{token}] failed: {message}"),
        ScanEvent::Cancelled { token, message } => format!("[{token}] {message}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if args.immediate {
        config = PipelineConfig {
            event_capacity: config.event_capacity,
            ..PipelineConfig::immediate()
        };
    }

    let extension = args
        .image
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let mime_type = mime_from_extension(extension)
        .with_context(|| format!("cannot infer an image type from {}", args.image.display()))?;
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;

    let pipeline = ScanPipeline::new(config);
    pipeline.load_image(&bytes, mime_type)?;
    pipeline.set_vehicle_class(args.vehicle_class);
    pipeline.set_selection(args.selection);

    let mut events = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    eprintln!("{}", describe(&event));
                    if matches!(
                        event,
                        ScanEvent::Finished { .. } | ScanEvent::Failed { .. } | ScanEvent::Cancelled { .. }
                    ) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => eprintln!("... {missed} events skipped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut handle = pipeline.spawn_scan()?;
    let outcome = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            pipeline.cancel();
            handle.await?
        }
    };
    printer.await?;

    match outcome {
        ScanOutcome::Done(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(path) = &args.annotate {
                let grid = pixel_grid::decode(&bytes, mime_type)?;
                save_png(path, &annotate(&grid, &report.detections))
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            Ok(())
        }
        ScanOutcome::Failed { message } => bail!("scan failed: {message}"),
        ScanOutcome::Cancelled => {
            eprintln!("scan cancelled");
            Ok(())
        }
        ScanOutcome::Superseded => bail!("scan was superseded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("damage_scan").chain(list.iter().copied()))
    }

    #[test]
    fn parses_all_options() {
        let parsed = args(&[
            "car.jpg",
            "--class",
            "heavy",
            "--select",
            "0.1, 0.2, 0.5, 0.5",
            "--immediate",
            "--annotate",
            "out.png",
        ])
        .unwrap();
        assert_eq!(parsed.image, PathBuf::from("car.jpg"));
        assert_eq!(parsed.vehicle_class, VehicleClass::Heavy);
        assert_eq!(parsed.selection, Some(SelectionRect::new(0.1, 0.2, 0.5, 0.5)));
        assert!(parsed.immediate);
        assert_eq!(parsed.annotate, Some(PathBuf::from("out.png")));
        assert_eq!(parsed.config, None);
    }

    #[test]
    fn defaults_to_a_passenger_vehicle_and_the_whole_image() {
        let parsed = args(&["car.png"]).unwrap();
        assert_eq!(parsed.vehicle_class, VehicleClass::Passenger);
        assert_eq!(parsed.selection, None);
        assert!(!parsed.immediate);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(args(&[]).is_err());
        assert!(args(&["a.png", "b.png"]).is_err());
        assert!(args(&["a.png", "--class"]).is_err());
        assert!(args(&["a.png", "--class", "boat"]).is_err());
        assert!(args(&["a.png", "--select", "0.5,0.5,0.8,0.1"]).is_err());
        assert!(args(&["a.png", "--select", "1,2,3"]).is_err());
        assert!(args(&["a.png", "--verbose"]).is_err());
    }
}
