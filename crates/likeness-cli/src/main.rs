use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::{ScrfdLocator, TrainingError};
use likeness_engine::{
    CancelToken, Config, Engine, EngineError, EnrollEvent, EnrollOutcome, FrameReport,
    RemoveOutcome, StopReason, Verdict,
};
use likeness_hw::{Camera, CameraError, FrameSource, ReplaySource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "likeness", about = "Local face enrollment and recognition")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/likeness/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from the camera
    Enroll {
        /// Display name for the person
        #[arg(short, long)]
        name: String,
        /// Free-form note stored with the person
        #[arg(long)]
        note: Option<String>,
        /// Replay PNG frames from this directory instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Recognize faces until interrupted
    Recognize {
        /// Replay PNG frames from this directory instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Retrain the model from every stored sample
    Train,
    /// List enrolled persons
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove a person and retrain
    Remove {
        /// Person ID to remove
        id: i64,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Frames to capture
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Write the last captured frame to this PNG
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Enroll { name, note, frames } => enroll(open_engine(config).await?, name, note, frames).await,
        Commands::Recognize { frames } => recognize(open_engine(config).await?, frames).await,
        Commands::Train => train(open_engine(config).await?).await,
        Commands::List { json } => list(open_engine(config).await?, json).await,
        Commands::Remove { id } => remove(open_engine(config).await?, id).await,
        Commands::Devices => {
            list_devices();
            Ok(())
        }
        Commands::Test { count, save } => {
            tokio::task::spawn_blocking(move || {
                camera_test(&config.camera_device, config.warmup_frames, count, save.as_deref())
            })
            .await?
        }
    }
}

async fn open_engine(config: Config) -> Result<Arc<Engine>> {
    let engine = tokio::task::spawn_blocking(move || Engine::open(config)).await??;
    Ok(Arc::new(engine))
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            token.cancel();
        }
    });
}

fn open_source(frames: Option<&Path>, device: &str) -> Result<Box<dyn FrameSource>, CameraError> {
    Ok(match frames {
        Some(dir) => Box::new(ReplaySource::from_dir(dir)?),
        None => Box::new(Camera::open(device)?),
    })
}

async fn enroll(engine: Arc<Engine>, name: String, note: Option<String>, frames: Option<PathBuf>) -> Result<()> {
    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let (tx, mut rx) = mpsc::channel::<EnrollEvent>(64);

    let worker = tokio::task::spawn_blocking(move || -> Result<EnrollOutcome> {
        let mut locator = ScrfdLocator::load(&engine.config().locator_model_path)?;
        let device = engine.config().camera_device.clone();
        let outcome = engine.enrollment(&mut locator).run(
            || open_source(frames.as_deref(), &device),
            &name,
            note.as_deref(),
            &cancel,
            |event| {
                let _ = tx.blocking_send(event);
            },
        )?;
        Ok(outcome)
    });

    while let Some(event) = rx.recv().await {
        match event {
            EnrollEvent::Started { person } => {
                println!("Enrolling person {person}. Look at the camera; Ctrl-C to stop early.")
            }
            EnrollEvent::SampleCaptured { count, target, .. } => println!("  captured {count}/{target}"),
            EnrollEvent::MultipleFaces { frame, faces } => {
                println!("  frame {frame}: {faces} faces in view, skipped")
            }
            EnrollEvent::NoFace { .. } => {}
            EnrollEvent::Training { samples } => println!("Training with {samples} new samples..."),
        }
    }

    match worker.await?? {
        EnrollOutcome::Committed {
            person,
            samples,
            training,
            ..
        } => {
            println!(
                "Enrolled person {person} with {samples} samples ({} persons, {} samples in model)",
                training.persons, training.samples
            );
            Ok(())
        }
        EnrollOutcome::RolledBack {
            samples,
            required,
            stop,
            ..
        } => {
            let why = match stop {
                StopReason::Cancelled => "stopped",
                StopReason::EndOfStream => "frames ran out",
                StopReason::TargetReached => "target reached",
            };
            bail!("enrollment discarded: {why} after {samples} samples, {required} required")
        }
    }
}

async fn recognize(engine: Arc<Engine>, frames: Option<PathBuf>) -> Result<()> {
    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let (tx, mut rx) = mpsc::channel::<FrameReport>(64);

    let worker = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut locator = ScrfdLocator::load(&engine.config().locator_model_path)?;
        let mut session = engine.recognition(&mut locator)?;
        session.start()?;
        let source = open_source(frames.as_deref(), &engine.config().camera_device)?;
        let summary = session.run(source, &cancel, |report| {
            if report.processed {
                let _ = tx.blocking_send(report.clone());
            }
        })?;
        Ok(summary)
    });

    while let Some(report) = rx.recv().await {
        if report.faces.is_empty() {
            continue;
        }
        let faces: Vec<String> = report
            .faces
            .iter()
            .map(|f| {
                let tag = if matches!(f.verdict, Verdict::Uncertain { .. }) { "?" } else { "" };
                format!(
                    "{}{tag} ({:.1}) at {},{} {}x{}",
                    f.verdict.label(),
                    f.verdict.distance(),
                    f.face.x,
                    f.face.y,
                    f.face.width,
                    f.face.height
                )
            })
            .collect();
        println!("frame {}: {}", report.frame, faces.join(", "));
    }

    let summary = worker.await??;
    println!(
        "Processed {} of {} frames ({:?})",
        summary.processed, summary.frames, summary.stop
    );
    Ok(())
}

async fn train(engine: Arc<Engine>) -> Result<()> {
    match tokio::task::spawn_blocking(move || engine.retrain()).await? {
        Ok(summary) => {
            println!("Trained on {} samples from {} persons", summary.samples, summary.persons);
            Ok(())
        }
        Err(EngineError::Training(TrainingError::NoSamples)) => {
            println!("Nothing to train: no samples stored");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list(engine: Arc<Engine>, json: bool) -> Result<()> {
    let rows = tokio::task::spawn_blocking(move || -> Result<_> {
        let persons = engine.list_persons()?;
        let mut rows = Vec::with_capacity(persons.len());
        for person in persons {
            let samples = engine.store().sample_count(person.id)?;
            rows.push((person, samples));
        }
        Ok(rows)
    })
    .await??;

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|(person, samples)| {
                serde_json::json!({
                    "id": person.id,
                    "name": person.name,
                    "note": person.note,
                    "created_at": person.created_at,
                    "committed": person.committed,
                    "samples": samples,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No persons enrolled");
        return Ok(());
    }
    println!("{:>5}  {:<24} {:>7}  CREATED", "ID", "NAME", "SAMPLES");
    for (person, samples) in rows {
        let name = if person.committed {
            person.name
        } else {
            format!("{} (enrolling)", person.name)
        };
        println!(
            "{:>5}  {:<24} {:>7}  {}",
            person.id,
            name,
            samples,
            person.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn remove(engine: Arc<Engine>, id: i64) -> Result<()> {
    match tokio::task::spawn_blocking(move || engine.remove_person(id)).await?? {
        RemoveOutcome::NotFound => bail!("no person with id {id}"),
        RemoveOutcome::Retrained(summary) => println!(
            "Removed person {id}; model retrained on {} persons",
            summary.persons
        ),
        RemoveOutcome::ModelCleared => println!("Removed person {id}; no persons remain, model cleared"),
    }
    Ok(())
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

fn camera_test(device: &str, warmup: usize, count: usize, save: Option<&Path>) -> Result<()> {
    println!("Opening {device}...");
    let mut camera = Camera::open(device)?;
    println!("  {}x{}", camera.width, camera.height);

    for _ in 0..warmup {
        camera.next_frame()?;
    }

    let started = Instant::now();
    let mut last = None;
    for _ in 0..count {
        let Some(frame) = camera.next_frame()? else {
            break;
        };
        let mean = frame.data.iter().map(|&p| p as u64).sum::<u64>() / frame.data.len().max(1) as u64;
        println!("  frame {:>4}: mean brightness {mean}", frame.sequence);
        last = Some(frame);
    }
    let elapsed = started.elapsed();
    camera.release();

    let Some(frame) = last else {
        bail!("camera produced no frames");
    };
    if count > 0 {
        println!(
            "Captured {count} frames in {:.2}s ({:.1} fps)",
            elapsed.as_secs_f64(),
            count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );
    }

    if let Some(path) = save {
        let image = image::GrayImage::from_raw(frame.width, frame.height, frame.data)
            .context("frame buffer does not match its dimensions")?;
        image
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Saved last frame to {}", path.display());
    }
    Ok(())
}
