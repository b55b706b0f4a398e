use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, bail};
use chrono::{TimeDelta, Utc};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use psth_common::{
    NeuralEvent, Timestamped, ms_to_delta,
    metrics::metric_names::{
        FAILURES, RESETS, SAMPLES_RECEIVED, SNAPSHOTS_PUBLISHED, TRIGGERS_RECEIVED,
        WINDOWS_PROCESSED,
    },
};
use psth_engine::{AggregatorSnapshot, EngineConfig, EngineInputs, PsthEngine};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Poisson};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Number of recording electrodes to simulate
    #[clap(long, default_value = "2")]
    electrodes: usize,

    /// Sorted units per electrode
    #[clap(long, default_value = "2")]
    units_per_electrode: u16,

    /// Baseline firing rate of each unit in Hz
    #[clap(long, default_value = "8.0")]
    baseline_rate_hz: f64,

    /// Mean number of evoked spikes a trigger adds per unit, scaled up with
    /// the class index; 0 disables the evoked response
    #[clap(long, default_value = "3.0")]
    evoked_spikes: f64,

    /// Mean latency of the evoked response in ms
    #[clap(long, default_value = "30.0")]
    evoked_latency_ms: f64,

    /// Jitter (sigma) of the evoked response in ms
    #[clap(long, default_value = "10.0")]
    evoked_jitter_ms: f64,

    /// Number of trigger classes to cycle through
    #[clap(long, default_value = "2")]
    classes: usize,

    /// Interval between triggers in ms
    #[clap(long, default_value = "750")]
    trigger_interval_ms: u64,

    /// Width of the negative half window of the histogram in ms
    #[clap(long, default_value = "100.0")]
    left_half_window_ms: f64,

    /// Width of the positive half window of the histogram in ms
    #[clap(long, default_value = "200.0")]
    right_half_window_ms: f64,

    /// Number of histogram bins across the window
    #[clap(long, default_value = "30")]
    bin_count: usize,

    /// Sigma of the Gaussian smoothing kernel in ms, 0 disables smoothing
    #[clap(long, default_value = "5.0")]
    smoothing_sigma_ms: f64,

    /// How long to run before exiting, 0 to run until interrupted
    #[clap(long, default_value = "10")]
    run_seconds: u64,

    #[clap(long, env, default_value = "127.0.0.1:9090")]
    observability_address: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();
    debug!("Args: {args:?}");

    if args.baseline_rate_hz <= 0.0 {
        bail!("baseline rate must be positive");
    }
    if args.classes == 0 {
        bail!("at least one trigger class is required");
    }
    if args.evoked_spikes < 0.0 || args.evoked_jitter_ms < 0.0 {
        bail!("evoked response parameters must be non-negative");
    }

    PrometheusBuilder::new()
        .with_http_listener(args.observability_address)
        .install()?;
    describe_metrics();

    let baseline =
        Poisson::new(args.baseline_rate_hz * TICK_MS as f64 / 1_000.0).map_err(|e| {
            anyhow::anyhow!("invalid baseline rate {}: {e}", args.baseline_rate_hz)
        })?;
    let evoked = evoked_distributions(&args)?;
    let latency = Normal::new(args.evoked_latency_ms, args.evoked_jitter_ms)
        .map_err(|e| anyhow::anyhow!("invalid evoked latency: {e}"))?;

    let (sample_tx, sample_rx) = mpsc::channel(1_024);
    let (trigger_tx, trigger_rx) = mpsc::channel(64);

    let (handle, mut snapshots) = PsthEngine::spawn(
        EngineConfig {
            left_half_window_ms: args.left_half_window_ms,
            right_half_window_ms: args.right_half_window_ms,
            bin_count: args.bin_count,
            smoothing_sigma_ms: args.smoothing_sigma_ms,
            ..EngineConfig::default()
        },
        EngineInputs {
            samples: sample_rx,
            triggers: trigger_rx,
            resets: None,
        },
    )?;

    let generator = tokio::spawn(generate_activity(
        args.clone(),
        baseline,
        evoked,
        latency,
        sample_tx,
        trigger_tx,
    ));

    let run = tokio::time::sleep(Duration::from_secs(args.run_seconds));
    tokio::pin!(run);
    loop {
        tokio::select! {
            Some(snapshot) = snapshots.recv() => {
                log_snapshot(&snapshot);
            }
            _ = &mut run, if args.run_seconds > 0 => {
                info!("simulation time elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    generator.abort();
    handle.stop();
    Ok(())
}

const TICK_MS: u64 = 10;

fn describe_metrics() {
    metrics::describe_counter!(
        SAMPLES_RECEIVED,
        metrics::Unit::Count,
        "Number of raw samples received"
    );
    metrics::describe_counter!(
        TRIGGERS_RECEIVED,
        metrics::Unit::Count,
        "Number of triggers received"
    );
    metrics::describe_counter!(
        WINDOWS_PROCESSED,
        metrics::Unit::Count,
        "Number of triggered windows folded into the histograms"
    );
    metrics::describe_counter!(
        SNAPSHOTS_PUBLISHED,
        metrics::Unit::Count,
        "Number of snapshots published"
    );
    metrics::describe_counter!(RESETS, metrics::Unit::Count, "Number of resets performed");
    metrics::describe_counter!(
        FAILURES,
        metrics::Unit::Count,
        "Number of failures encountered"
    );
}

/// One Poisson spike-count distribution per trigger class, with the mean
/// evoked response growing with the class index so the per-class curves
/// separate visibly.
fn evoked_distributions(args: &Cli) -> Result<Vec<Poisson<f64>>> {
    if args.evoked_spikes == 0.0 {
        return Ok(Vec::new());
    }
    (1..=args.classes)
        .map(|index| {
            Poisson::new(args.evoked_spikes * index as f64 / args.classes as f64)
                .map_err(|e| anyhow::anyhow!("invalid evoked spike count: {e}"))
        })
        .collect()
}

fn electrode_name(index: usize) -> String {
    format!("TT{index}")
}

fn class_name(index: usize) -> String {
    format!("cond{}", index + 1)
}

async fn generate_activity(
    args: Cli,
    baseline: Poisson<f64>,
    evoked: Vec<Poisson<f64>>,
    latency: Normal<f64>,
    samples: mpsc::Sender<Timestamped<NeuralEvent>>,
    triggers: mpsc::Sender<Timestamped<String>>,
) {
    let mut rng = StdRng::from_os_rng();
    let mut clock = tokio::time::interval(Duration::from_millis(TICK_MS));
    let interval = TimeDelta::milliseconds(args.trigger_interval_ms as i64);
    let mut next_trigger = Utc::now() + interval;
    let mut trigger_index = 0usize;
    let mut lfp_channel: u16 = 0;

    loop {
        clock.tick().await;
        let now = Utc::now();

        for electrode in 0..args.electrodes {
            for unit in 1..=args.units_per_electrode {
                let count = baseline.sample(&mut rng) as usize;
                for _ in 0..count {
                    let offset_ms = rng.random_range(0.0..TICK_MS as f64);
                    let spike = Timestamped::new(
                        NeuralEvent::Spike {
                            electrode: electrode_name(electrode),
                            sorted_id: unit,
                        },
                        now - ms_to_delta(offset_ms),
                    );
                    if samples.send(spike).await.is_err() {
                        return;
                    }
                }
            }
        }

        let lfp = Timestamped::new(
            NeuralEvent::Continuous {
                channel: lfp_channel,
                sample_count: 32,
            },
            now,
        );
        lfp_channel = (lfp_channel + 1) % args.electrodes.max(1) as u16;
        if samples.send(lfp).await.is_err() {
            return;
        }

        if rng.random_bool(0.02) {
            let event = Timestamped::new(
                NeuralEvent::Event {
                    line: rng.random_range(0..4u8),
                    state: rng.random_bool(0.5),
                },
                now,
            );
            if samples.send(event).await.is_err() {
                return;
            }
        }

        if now >= next_trigger {
            let class_index = trigger_index % args.classes;
            let trigger = Timestamped::new(class_name(class_index), now);
            debug!("trigger {} at {now}", trigger.value);
            if triggers.send(trigger).await.is_err() {
                return;
            }

            if let Some(burst) = evoked.get(class_index) {
                for electrode in 0..args.electrodes {
                    for unit in 1..=args.units_per_electrode {
                        let count = burst.sample(&mut rng) as usize;
                        for _ in 0..count {
                            let latency_ms = latency.sample(&mut rng).max(0.0);
                            let spike = Timestamped::new(
                                NeuralEvent::Spike {
                                    electrode: electrode_name(electrode),
                                    sorted_id: unit,
                                },
                                now + ms_to_delta(latency_ms),
                            );
                            if samples.send(spike).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            trigger_index += 1;
            next_trigger = now + interval;
        }
    }
}

fn log_snapshot(snapshot: &AggregatorSnapshot<String>) {
    if snapshot.is_empty() {
        info!("snapshot: empty");
        return;
    }
    let peak = snapshot
        .iter()
        .map(|histogram| histogram.counts().iter().fold(0.0_f64, |acc, &v| acc.max(v)))
        .fold(0.0_f64, f64::max);
    info!(
        "snapshot: {} units, {} classes, repetitions {:?}, peak rate {:.1} Hz",
        snapshot.len(),
        snapshot.classes().len(),
        snapshot.counts(),
        peak
    );
    debug!("{snapshot}");
}
