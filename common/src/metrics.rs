pub mod metric_names {
    pub const METRIC_NAME_PREFIX: &str = "psth_pipeline_";

    pub const FAILURES: &str = "psth_pipeline_failures";
    pub const RESETS: &str = "psth_pipeline_resets";
    pub const SAMPLES_RECEIVED: &str = "psth_pipeline_samples_received";
    pub const SNAPSHOTS_PUBLISHED: &str = "psth_pipeline_snapshots_published";
    pub const TRIGGERS_RECEIVED: &str = "psth_pipeline_triggers_received";
    pub const WINDOWS_PROCESSED: &str = "psth_pipeline_windows_processed";
}

pub mod samples_received {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum SampleKind {
        Continuous,
        Spike,
        Event,
    }

    // Label building function
    pub fn get_label(sample_kind: SampleKind) -> (&'static str, &'static str) {
        (
            "sample_kind",
            match sample_kind {
                SampleKind::Continuous => "continuous",
                SampleKind::Spike => "spike",
                SampleKind::Event => "event",
            },
        )
    }
}

pub mod resets {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum ResetKind {
        Manual,
        External,
        ParameterChange,
        IngestRecovery,
    }

    // Label building function
    pub fn get_label(reset_kind: ResetKind) -> (&'static str, &'static str) {
        (
            "reset_kind",
            match reset_kind {
                ResetKind::Manual => "manual",
                ResetKind::External => "external",
                ResetKind::ParameterChange => "parameter_change",
                ResetKind::IngestRecovery => "ingest_recovery",
            },
        )
    }
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        WindowIngestFailed,
        SnapshotFailed,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::WindowIngestFailed => "window_ingest_failed",
                FailureKind::SnapshotFailed => "snapshot_failed",
            },
        )
    }
}
