mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vitalwatch_alert::{
    AlertChannel, AlertEvaluator, AlertStore, Broadcaster, LogChannel, NotifyTargets,
    ThrottledNotifier, WebhookChannel,
};
use vitalwatch_core::{
    Alert, AlertKind, PatientId, Severity, ThresholdTable, Vital, VitalRecord, VitalSource,
};
use vitalwatch_extract::{
    DualExtractor, ModelConfig, ModelExtractor, PatternExtractor, RegionExtractor,
    TesseractRecognizer,
};
use vitalwatch_monitor::{CycleOutcome, FileFrameSource, Monitor, MonitorConfig};
use vitalwatch_store::{DuckStore, MemoryLedger, MemoryRepository, ThrottleLedger, VitalRepository};

#[derive(Parser, Debug)]
#[command(name = "vitalwatch")]
#[command(version, about = "Patient monitor vitals extraction and alerting")]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Settings {
    /// Pipeline config file (JSON); defaults apply to missing keys
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// ROI layout file (JSON array of {label,x,y,width,height,unit?})
    #[arg(long, global = true)]
    rois: Option<PathBuf>,

    /// Chat-completions endpoint of the vision model
    #[arg(long, global = true, env = "VITALWATCH_MODEL_URL")]
    model_url: Option<String>,

    /// Vision model name
    #[arg(long, global = true, env = "VITALWATCH_MODEL")]
    model: Option<String>,

    #[arg(long, global = true, env = "HUGGING_FACE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Tesseract executable used for the pattern extractor
    #[arg(long, global = true, env = "VITALWATCH_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Notification relay URL; notifications are only logged when unset
    #[arg(long, global = true, env = "VITALWATCH_NOTIFY_URL")]
    notify_url: Option<String>,

    #[arg(long, global = true, env = "VITALWATCH_NOTIFY_EMAIL")]
    notify_email: Option<String>,

    #[arg(long, global = true, env = "VITALWATCH_NOTIFY_PHONE")]
    notify_phone: Option<String>,

    /// DuckDB file for vitals history and the throttle ledger; in-memory when unset
    #[arg(long, global = true, env = "VITALWATCH_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run both extractors on one image and print what each read
    Extract {
        image: PathBuf,
    },
    /// Run one full cycle for a patient: extract, store, evaluate, notify
    Process {
        #[arg(short, long)]
        patient: u64,
        image: PathBuf,
        #[arg(short, long, default_value = "camera")]
        source: VitalSource,
    },
    /// Re-read an image file on every capture interval until Ctrl-C
    Watch {
        #[arg(short, long)]
        patient: u64,
        image: PathBuf,
    },
    /// Evaluate a patient's stored history and list the resulting alerts
    Alerts {
        #[arg(short, long)]
        patient: u64,
        /// Only the newest alert per vital
        #[arg(long)]
        live: bool,
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Raise an operator alert and push it through the notifier
    TestAlert {
        #[arg(short, long)]
        patient: u64,
        #[arg(long, default_value = "HR")]
        vital: Vital,
        #[arg(long, default_value = "145")]
        value: f64,
        #[arg(long, value_enum, default_value = "high")]
        kind: KindArg,
        #[arg(long, value_enum, default_value = "critical")]
        severity: SeverityArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    High,
    Low,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SeverityArg {
    Warning,
    Critical,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("vitalwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli.settings)?;
    match cli.command {
        Command::Extract { image } => cmd_extract(&cli.settings, &config, &image).await,
        Command::Process {
            patient,
            image,
            source,
        } => cmd_process(&cli.settings, config, PatientId(patient), &image, source).await,
        Command::Watch { patient, image } => {
            cmd_watch(&cli.settings, config, PatientId(patient), image).await
        }
        Command::Alerts {
            patient,
            live,
            limit,
        } => cmd_alerts(&cli.settings, PatientId(patient), live, limit).await,
        Command::TestAlert {
            patient,
            vital,
            value,
            kind,
            severity,
        } => cmd_test_alert(&cli.settings, &config, PatientId(patient), vital, value, kind, severity).await,
    }
}

// ── Wiring ──

fn load_config(settings: &Settings) -> anyhow::Result<MonitorConfig> {
    let mut config = match &settings.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(path) = &settings.rois {
        config = config.with_roi_file(path)?;
    }
    Ok(config)
}

fn build_extractor(settings: &Settings, config: &MonitorConfig) -> DualExtractor {
    let mut model_config = ModelConfig {
        api_key: settings.api_key.clone(),
        ..ModelConfig::default()
    };
    if let Some(url) = &settings.model_url {
        model_config.endpoint = url.clone();
    }
    if let Some(model) = &settings.model {
        model_config.model = model.clone();
    }
    if model_config.api_key.is_none() {
        warn!("no model API key configured; model-based extraction will report failure");
    }

    let model: Arc<dyn RegionExtractor> = Arc::new(ModelExtractor::new(model_config));
    let pattern: Arc<dyn RegionExtractor> = Arc::new(PatternExtractor::new(Arc::new(
        TesseractRecognizer::new(settings.tesseract.clone()),
    )));
    DualExtractor::new(model, pattern, config.extractor_timeout())
}

struct Storage {
    repository: Arc<dyn VitalRepository>,
    ledger: Arc<dyn ThrottleLedger>,
    durable: bool,
}

fn open_storage(settings: &Settings) -> anyhow::Result<Storage> {
    match &settings.db {
        Some(path) => {
            let store = Arc::new(
                DuckStore::open_persistent(path)
                    .with_context(|| format!("opening {}", path.display()))?,
            );
            Ok(Storage {
                repository: store.clone(),
                ledger: store,
                durable: true,
            })
        }
        None => {
            warn!(
                "no --db given; vitals history and the notification throttle ledger \
                 are kept in memory and reset on restart"
            );
            Ok(Storage {
                repository: Arc::new(MemoryRepository::new()),
                ledger: Arc::new(MemoryLedger::new()),
                durable: false,
            })
        }
    }
}

fn build_notifier(
    settings: &Settings,
    config: &MonitorConfig,
    ledger: Arc<dyn ThrottleLedger>,
) -> ThrottledNotifier {
    let targets = NotifyTargets {
        email: settings.notify_email.clone(),
        phone: settings.notify_phone.clone(),
    };
    let channel: Arc<dyn AlertChannel> = match &settings.notify_url {
        Some(url) => Arc::new(WebhookChannel::new(url.clone()).with_timeout(config.delivery_timeout())),
        None => {
            if !targets.is_empty() {
                info!("no notification relay configured; critical alerts will be logged only");
            }
            Arc::new(LogChannel)
        }
    };
    ThrottledNotifier::new(channel, ledger, targets)
        .with_window(config.throttle_window())
        .with_delivery_timeout(config.delivery_timeout())
}

fn build_monitor(settings: &Settings, config: MonitorConfig) -> anyhow::Result<Monitor> {
    let storage = open_storage(settings)?;
    let extractor = build_extractor(settings, &config);
    let notifier = build_notifier(settings, &config, storage.ledger);
    let broadcaster = Arc::new(Broadcaster::new(config.broadcast_capacity));
    Ok(Monitor::new(
        config,
        extractor,
        storage.repository,
        AlertEvaluator::new(ThresholdTable::default()),
        Arc::new(AlertStore::new()),
        broadcaster,
        notifier,
    ))
}

async fn read_frame(path: &Path) -> anyhow::Result<vitalwatch_extract::Frame> {
    Ok(FileFrameSource::new(path).read().await?)
}

// ── Commands ──

async fn cmd_extract(settings: &Settings, config: &MonitorConfig, image: &Path) -> anyhow::Result<()> {
    let frame = read_frame(image).await?;
    let extractor = build_extractor(settings, config);
    let outcome = extractor
        .run(&frame, &config.rois, None, Utc::now(), VitalSource::Manual)
        .await;

    let report = serde_json::json!({
        "model": display::extraction_json(&outcome.model),
        "pattern": display::extraction_json(&outcome.pattern),
        "fused": outcome.snapshot,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_process(
    settings: &Settings,
    config: MonitorConfig,
    patient: PatientId,
    image: &Path,
    source: VitalSource,
) -> anyhow::Result<()> {
    let frame = read_frame(image).await?;
    let monitor = build_monitor(settings, config)?;
    match monitor.process_frame(patient, &frame, source).await? {
        CycleOutcome::Empty => println!("no vitals could be read from {}", image.display()),
        CycleOutcome::Accepted {
            record,
            alerts,
            notifications,
        } => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            display::print_alerts("Alerts", &alerts);
            for (alert, outcome) in alerts.iter().zip(&notifications) {
                info!(id = %alert.id, outcome = ?outcome, "notification");
            }
        }
    }
    Ok(())
}

async fn cmd_watch(
    settings: &Settings,
    config: MonitorConfig,
    patient: PatientId,
    image: PathBuf,
) -> anyhow::Result<()> {
    let monitor = build_monitor(settings, config)?;
    let frames = FileFrameSource::new(image);
    let cancel = CancellationToken::new();

    let mut events = monitor.broadcaster().subscribe_patient(patient);
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "could not render event"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    monitor.watch(patient, &frames, VitalSource::Camera, cancel).await;
    ctrl_c.abort();
    printer.abort();
    display::print_alerts("Alerts this session", &monitor.alerts().get(patient));
    Ok(())
}

async fn cmd_alerts(settings: &Settings, patient: PatientId, live: bool, limit: usize) -> anyhow::Result<()> {
    let storage = open_storage(settings)?;
    if !storage.durable {
        println!("no stored history without --db");
        return Ok(());
    }
    let history = storage.repository.query(patient, limit).await?;
    let store = replay_alerts(patient, &history);

    if live {
        display::print_alerts("Active alerts", &store.latest_per_vital(patient));
    } else {
        let mut alerts = store.get(patient);
        alerts.reverse();
        display::print_alerts("Alert history", &alerts);
    }
    Ok(())
}

/// Rebuild the alerts a live session would have raised from stored history.
///
/// Records are fed oldest first, one cycle each, through an evaluator that
/// only scores a snapshot newer than the last one it saw.
fn replay_alerts(patient: PatientId, history: &[VitalRecord]) -> AlertStore {
    let mut ordered: Vec<&VitalRecord> = history.iter().collect();
    ordered.sort_by_key(|r| (r.snapshot.timestamp, r.vital_id));

    let evaluator = AlertEvaluator::new(ThresholdTable::default());
    let store = AlertStore::new();
    for record in ordered {
        for alert in evaluator.evaluate_latest(patient, &record.snapshot) {
            store.record(alert);
        }
    }
    store
}

async fn cmd_test_alert(
    settings: &Settings,
    config: &MonitorConfig,
    patient: PatientId,
    vital: Vital,
    value: f64,
    kind: KindArg,
    severity: SeverityArg,
) -> anyhow::Result<()> {
    let kind = match kind {
        KindArg::High => AlertKind::High,
        KindArg::Low => AlertKind::Low,
    };
    let severity = match severity {
        SeverityArg::Warning => Severity::Warning,
        SeverityArg::Critical => Severity::Critical,
    };
    let alert = Alert::new(patient, vital, value, kind, severity, Utc::now());

    let storage = open_storage(settings)?;
    let notifier = build_notifier(settings, config, storage.ledger);
    let store = AlertStore::new();
    store.record(alert.clone());

    let outcome = notifier.notify(&alert).await;
    display::print_alerts("Recorded", &store.get(patient));
    println!("notifier: {outcome:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};
    use vitalwatch_core::VitalsSnapshot;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap()
    }

    fn record(vital_id: i64, secs: i64, hr: f64) -> VitalRecord {
        VitalRecord {
            vital_id,
            snapshot: VitalsSnapshot::new(
                Some(PatientId(7)),
                t0() + Duration::seconds(secs),
                VitalSource::Camera,
            )
            .with(Vital::Hr, hr),
        }
    }

    #[test]
    fn replay_walks_history_oldest_first() {
        // Newest first, as the repository returns it.
        let history = vec![record(3, 6, 150.0), record(2, 3, 80.0), record(1, 0, 145.0)];
        let store = replay_alerts(PatientId(7), &history);

        let values: Vec<_> = store
            .get(PatientId(7))
            .iter()
            .map(|a| a.value.to_string())
            .collect();
        assert_eq!(values, vec!["145", "150"]);
        let live = store.latest_per_vital(PatientId(7));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].timestamp, t0() + Duration::seconds(6));
    }

    #[test]
    fn storage_without_db_is_not_durable() {
        let cli = Cli::try_parse_from(["vitalwatch", "alerts", "--patient", "7"]).unwrap();
        let storage = open_storage(&Settings {
            db: None,
            ..cli.settings
        })
        .unwrap();
        assert!(!storage.durable);
    }

    #[test]
    fn storage_with_db_is_durable() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("vitals.duckdb");
        let cli = Cli::try_parse_from([
            "vitalwatch",
            "alerts",
            "--patient",
            "7",
            "--db",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let storage = open_storage(&cli.settings).unwrap();
        assert!(storage.durable);
    }
}
