use anyhow::{anyhow, bail, Context, Result};
use crabalign::alignment::AlignmentWorker;
use crabalign::config::AlignConfig;
use crabalign::events::AlignmentEvent;
use crabalign::results::ResultAggregator;
use crabalign::testing::SimulatedRig;
use crabalign::types::MachineXY;
use crabalign::vision::VisionPipeline;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

const USAGE: &str = "Usage: crabalign-cli <command> [args]

Commands:
  detect <image> [--json]           Run fiducial detection on an image file
  simulate [--tools N] [--cycles N] [--export FILE]
                                    Align tools on the simulated rig
  stats <results.json>              Summarize exported results
  config [--write PATH]             Print or write the effective configuration
  list-devices [--json]             List native cameras (native-camera feature)

Global options:
  --config PATH                     Configuration file (default crabalign.toml)";

fn main() -> Result<()> {
    crabalign::init_logging();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let config = load_config(&args)?;
    let command = &args[1];
    match command.as_str() {
        "detect" => cmd_detect(&args, &config),
        "simulate" => cmd_simulate(&args, config),
        "stats" => cmd_stats(&args),
        "config" => cmd_config(&args, &config),
        "list-devices" => cmd_list_devices(&args),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}\n\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

/// Value following `flag`, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| anyhow!("{} requires a value", flag)),
        None => Ok(None),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn load_config(args: &[String]) -> Result<AlignConfig> {
    let path = match flag_value(args, "--config")? {
        Some(path) => PathBuf::from(path),
        None => AlignConfig::default_path(),
    };
    let config = AlignConfig::load_from_file(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn cmd_detect(args: &[String], config: &AlignConfig) -> Result<()> {
    let path = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow!("Usage: crabalign-cli detect <image> [--json]"))?;
    let image = image::open(path)
        .with_context(|| format!("opening {}", path))?
        .to_rgb8();

    let mut pipeline = VisionPipeline::new(&config.detector);
    let detection = pipeline.analyze(&image);

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string(&detection.features)?);
    } else if detection.features.is_empty() {
        println!("No circles found.");
    } else {
        for f in &detection.features {
            println!("U{:.2} V{:.2} R{:.2}", f.center.u, f.center.v, f.radius);
        }
    }
    Ok(())
}

fn cmd_simulate(args: &[String], mut config: AlignConfig) -> Result<()> {
    if let Some(tools) = flag_value(args, "--tools")? {
        config.alignment.num_tools = tools.parse().context("--tools")?;
    }
    if let Some(cycles) = flag_value(args, "--cycles")? {
        config.alignment.cycles = cycles.parse().context("--cycles")?;
    }
    config.validate()?;

    let cp = config.alignment.controlled_point;
    let offsets = (0..config.alignment.num_tools)
        .map(|t| MachineXY::new(0.021 * t as f64, -0.013 * t as f64))
        .collect();
    let rig = SimulatedRig::builder()
        .camera_center(MachineXY::new(cp.x, cp.y))
        .rotation_deg(1.5)
        .tool_offsets(offsets)
        .build();

    let worker = AlignmentWorker::spawn(config, Box::new(rig.camera()), Box::new(rig.machine()))?;
    let mut events = worker.subscribe();

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    worker.start_alignment();
    let mut stop_sent = false;
    let results = loop {
        if interrupted.load(Ordering::SeqCst) && !stop_sent {
            eprintln!("Stopping...");
            worker.stop();
            stop_sent = true;
        }
        match events.try_recv() {
            Ok(AlignmentEvent::Status(text)) => println!("{}", text),
            Ok(AlignmentEvent::Message(text)) => log::debug!("{}", text),
            Ok(AlignmentEvent::DetectionError(text)) => eprintln!("{}", text),
            Ok(AlignmentEvent::Result(record)) => {
                println!(
                    "  T{} cycle {}: X{:.3} Y{:.3} mpp {:.4}",
                    record.tool, record.cycle, record.x, record.y, record.mpp
                );
            }
            Ok(AlignmentEvent::SessionComplete { results: records, .. }) => {
                break ResultAggregator::from_json(&serde_json::to_string(&records)?)?;
            }
            Ok(AlignmentEvent::SessionAborted { context, message, .. }) => {
                worker.shutdown();
                bail!("session aborted at {}: {}", context, message);
            }
            Ok(AlignmentEvent::Frame(_)) => {}
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(10)),
            Err(TryRecvError::Lagged(skipped)) => log::debug!("Skipped {} events", skipped),
            Err(TryRecvError::Closed) => bail!("alignment worker exited"),
        }
    };
    worker.shutdown();

    println!();
    print!("{}", results.report());
    if let Some(path) = flag_value(args, "--export")? {
        results.export(path)?;
        println!("Results written to {}", path);
    }
    Ok(())
}

fn cmd_stats(args: &[String]) -> Result<()> {
    let path = args
        .get(2)
        .ok_or_else(|| anyhow!("Usage: crabalign-cli stats <results.json>"))?;
    let results = ResultAggregator::import(path)?;
    if results.is_empty() {
        println!("No results in {}", path);
    } else {
        print!("{}", results.report());
    }
    Ok(())
}

fn cmd_config(args: &[String], config: &AlignConfig) -> Result<()> {
    match flag_value(args, "--write")? {
        Some(path) => {
            config.save_to_file(path)?;
            println!("Configuration written to {}", path);
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

#[cfg(feature = "native-camera")]
fn cmd_list_devices(args: &[String]) -> Result<()> {
    let devices = crabalign::camera::native::list_devices()?;
    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!("{}: {}", d.index, d.name);
        }
    }
    Ok(())
}

#[cfg(not(feature = "native-camera"))]
fn cmd_list_devices(_args: &[String]) -> Result<()> {
    bail!("built without the native-camera feature")
}
