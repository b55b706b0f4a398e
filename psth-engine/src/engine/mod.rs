mod params;

pub use params::EngineConfig;
use params::Params;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use metrics::counter;
use psth_common::{
    NeuralEvent, Timestamped, ms_to_delta,
    metrics::{
        failures::{self, FailureKind},
        metric_names::{
            FAILURES, RESETS, SAMPLES_RECEIVED, SNAPSHOTS_PUBLISHED, TRIGGERS_RECEIVED,
            WINDOWS_PROCESSED,
        },
        resets::{self, ResetKind},
        samples_received::{self, SampleKind},
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    error::HistogramResult,
    histogram::{AggregatorSnapshot, HistogramAggregator},
    window::{TriggeredWindow, TriggeredWindowExtractor},
};

/// The input streams the engine consumes. Each is an independent channel;
/// the worker merges them in one select loop.
pub struct EngineInputs<C> {
    pub samples: mpsc::Receiver<Timestamped<NeuralEvent>>,
    pub triggers: mpsc::Receiver<Timestamped<C>>,
    /// Optional external reset stream; only occurrence matters.
    pub resets: Option<mpsc::Receiver<()>>,
}

#[derive(Debug, Clone, Copy)]
enum EngineCommand {
    SetLeftHalfWindowMs(f64),
    SetRightHalfWindowMs(f64),
    SetBinCount(usize),
    SetBinWidthMs(f64),
    SetSmoothingSigmaMs(f64),
    Reset,
}

/// Control surface of a running engine.
///
/// Parameter setters follow the guards of [`EngineConfig`]: invalid or
/// no-op values are ignored; an accepted change rebuilds the smoothing
/// kernel, discards accumulated history, and emits one empty snapshot.
/// Dropping the handle leaves the worker running until the snapshot
/// consumer goes away; `stop` detaches the pipeline immediately, leaving
/// aggregator state intact but unobserved.
pub struct EngineHandle<C> {
    commands: mpsc::Sender<EngineCommand>,
    aggregator: Arc<HistogramAggregator<C>>,
    task: JoinHandle<()>,
}

impl<C> EngineHandle<C> {
    pub async fn set_left_half_window_ms(&self, value: f64) {
        self.send(EngineCommand::SetLeftHalfWindowMs(value)).await;
    }

    pub async fn set_right_half_window_ms(&self, value: f64) {
        self.send(EngineCommand::SetRightHalfWindowMs(value)).await;
    }

    pub async fn set_bin_count(&self, value: usize) {
        self.send(EngineCommand::SetBinCount(value)).await;
    }

    pub async fn set_bin_width_ms(&self, value: f64) {
        self.send(EngineCommand::SetBinWidthMs(value)).await;
    }

    pub async fn set_smoothing_sigma_ms(&self, value: f64) {
        self.send(EngineCommand::SetSmoothingSigmaMs(value)).await;
    }

    /// Clears accumulated histograms and emits one empty snapshot.
    pub async fn reset(&self) {
        self.send(EngineCommand::Reset).await;
    }

    /// The shared aggregator; it outlives the worker, so state survives a
    /// `stop` and remains inspectable.
    pub fn aggregator(&self) -> Arc<HistogramAggregator<C>> {
        Arc::clone(&self.aggregator)
    }

    pub fn stop(self) {
        self.task.abort();
    }

    async fn send(&self, command: EngineCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("engine worker is gone, dropping {command:?}");
        }
    }
}

/// Wires a [`TriggeredWindowExtractor`] into a [`HistogramAggregator`] on a
/// dedicated worker task and exposes the resulting snapshot stream.
pub struct PsthEngine;

impl PsthEngine {
    /// Starts the pipeline. Returns the control handle and the snapshot
    /// stream; one snapshot is emitted per processed window and per reset.
    /// The worker exits when the snapshot receiver is dropped.
    pub fn spawn<C>(
        config: EngineConfig,
        inputs: EngineInputs<C>,
    ) -> HistogramResult<(EngineHandle<C>, mpsc::Receiver<AggregatorSnapshot<C>>)>
    where
        C: Ord + Clone + Send + 'static,
    {
        let params = Params::try_from_config(&config)?;
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
        let aggregator = Arc::new(HistogramAggregator::new());

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (snapshots_tx, snapshots_rx) = mpsc::channel(64);

        let task = tokio::spawn(run_worker(
            params,
            poll_interval,
            Arc::clone(&aggregator),
            inputs,
            commands_rx,
            snapshots_tx,
        ));

        Ok((
            EngineHandle {
                commands: commands_tx,
                aggregator,
                task,
            },
            snapshots_rx,
        ))
    }
}

async fn run_worker<C>(
    mut params: Params,
    poll_interval: Duration,
    aggregator: Arc<HistogramAggregator<C>>,
    inputs: EngineInputs<C>,
    mut commands: mpsc::Receiver<EngineCommand>,
    snapshots: mpsc::Sender<AggregatorSnapshot<C>>,
) where
    C: Ord + Clone + Send + 'static,
{
    let mut kernel = params.kernel();
    let mut extractor: TriggeredWindowExtractor<NeuralEvent, C> = TriggeredWindowExtractor::new(
        ms_to_delta(params.buffered_left_half_ms()),
        ms_to_delta(params.buffered_right_half_ms()),
    );

    let EngineInputs {
        samples: mut sample_rx,
        triggers: mut trigger_rx,
        resets,
    } = inputs;
    let mut reset_rx = resets.unwrap_or_else(closed_channel);

    let mut poll = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            Some(command) = commands.recv() => {
                let proceed = match command {
                    EngineCommand::Reset => {
                        counter!(RESETS, &[resets::get_label(ResetKind::Manual)]).increment(1);
                        aggregator.reset();
                        publish(&aggregator, &params, &kernel, &snapshots).await
                    }
                    setter => {
                        if apply_setter(&mut params, setter) {
                            kernel = params.kernel();
                            extractor.set_half_windows(
                                ms_to_delta(params.buffered_left_half_ms()),
                                ms_to_delta(params.buffered_right_half_ms()),
                            );
                            counter!(RESETS, &[resets::get_label(ResetKind::ParameterChange)])
                                .increment(1);
                            aggregator.reset();
                            publish(&aggregator, &params, &kernel, &snapshots).await
                        } else {
                            debug!("ignoring no-op parameter change {setter:?}");
                            true
                        }
                    }
                };
                if !proceed {
                    break;
                }
            }
            Some(()) = reset_rx.recv() => {
                counter!(RESETS, &[resets::get_label(ResetKind::External)]).increment(1);
                aggregator.reset();
                if !publish(&aggregator, &params, &kernel, &snapshots).await {
                    break;
                }
            }
            Some(trigger) = trigger_rx.recv() => {
                counter!(TRIGGERS_RECEIVED).increment(1);
                let windows = extractor.push_trigger(trigger);
                if !apply_windows(&aggregator, &params, &kernel, &snapshots, windows).await {
                    break;
                }
            }
            Some(sample) = sample_rx.recv() => {
                counter!(
                    SAMPLES_RECEIVED,
                    &[samples_received::get_label(sample_kind(&sample.value))]
                )
                .increment(1);
                let windows = extractor.push_sample(sample);
                if !apply_windows(&aggregator, &params, &kernel, &snapshots, windows).await {
                    break;
                }
            }
            _ = poll.tick() => {
                let windows = extractor.poll(Utc::now());
                if !apply_windows(&aggregator, &params, &kernel, &snapshots, windows).await {
                    break;
                }
            }
            _ = snapshots.closed() => {
                break;
            }
        }
    }
    debug!("engine worker stopped");
}

fn apply_setter(params: &mut Params, command: EngineCommand) -> bool {
    match command {
        EngineCommand::SetLeftHalfWindowMs(value) => params.set_left_half_window_ms(value),
        EngineCommand::SetRightHalfWindowMs(value) => params.set_right_half_window_ms(value),
        EngineCommand::SetBinCount(value) => params.set_bin_count(value),
        EngineCommand::SetBinWidthMs(value) => params.set_bin_width_ms(value),
        EngineCommand::SetSmoothingSigmaMs(value) => params.set_smoothing_sigma_ms(value),
        EngineCommand::Reset => false,
    }
}

fn sample_kind(event: &NeuralEvent) -> SampleKind {
    match event {
        NeuralEvent::Continuous { .. } => SampleKind::Continuous,
        NeuralEvent::Spike { .. } => SampleKind::Spike,
        NeuralEvent::Event { .. } => SampleKind::Event,
    }
}

/// Folds each extracted window into the aggregator and emits one snapshot
/// per window. Returns `false` once the snapshot consumer is gone.
async fn apply_windows<C>(
    aggregator: &HistogramAggregator<C>,
    params: &Params,
    kernel: &[f64],
    snapshots: &mpsc::Sender<AggregatorSnapshot<C>>,
    windows: Vec<TriggeredWindow<NeuralEvent, C>>,
) -> bool
where
    C: Ord + Clone,
{
    for window in windows {
        counter!(WINDOWS_PROCESSED).increment(1);
        if let Err(error) = aggregator.add_samples(
            &window,
            params.total_bin_count(),
            params.left_edge_ms(),
            params.right_edge_ms(),
        ) {
            // The aggregator already reset itself; the emitted snapshot
            // reflects the cleared state.
            warn!("failed to fold triggered window: {error}");
            counter!(
                FAILURES,
                &[failures::get_label(FailureKind::WindowIngestFailed)]
            )
            .increment(1);
        }
        if !publish(aggregator, params, kernel, snapshots).await {
            return false;
        }
    }
    true
}

async fn publish<C>(
    aggregator: &HistogramAggregator<C>,
    params: &Params,
    kernel: &[f64],
    snapshots: &mpsc::Sender<AggregatorSnapshot<C>>,
) -> bool
where
    C: Ord + Clone,
{
    match aggregator.output(kernel) {
        Ok(snapshot) => {
            counter!(SNAPSHOTS_PUBLISHED).increment(1);
            snapshots.send(snapshot.trimmed(params.halo_bins())).await.is_ok()
        }
        Err(error) => {
            warn!("failed to produce snapshot: {error}");
            counter!(FAILURES, &[failures::get_label(FailureKind::SnapshotFailed)]).increment(1);
            true
        }
    }
}

fn closed_channel<T>() -> mpsc::Receiver<T> {
    let (_closed_tx, rx) = mpsc::channel(1);
    rx
}
