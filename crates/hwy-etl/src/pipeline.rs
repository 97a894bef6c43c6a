//! Per-state seeding pipeline.
//!
//! fetch -> classify -> assemble -> write (one transaction) -> concurrency
//! pass (second transaction over the committed rows). A failed stage aborts
//! only the current state; earlier states stay committed.

use hwy_core::{
    assemble_state, classify_features, AssembleError, ConcurrencyDetector, Discard, Feature,
    ProgressEvent, SourceSpec, StateCatalog, StateProfile,
};
use hwy_source::{FeatureSource, SourceError, SourceOptions};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::concurrency_pass::run_concurrency_pass;
use crate::config::Config;
use crate::persistence::{write_state_segments, Database};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown state '{0}'")]
    UnknownState(String),
    #[error("no feature source configured for state {0}")]
    NoSource(String),
    #[error(transparent)]
    NoFeatures(#[from] AssembleError),
    #[error("fetch stage failed for state {state}: {source}")]
    Source {
        state: String,
        #[source]
        source: SourceError,
    },
    #[error("{stage} stage failed for state {state}: {source:#}")]
    Storage {
        state: String,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of one seeded state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateReport {
    pub state: String,
    pub processed: usize,
    pub retained: usize,
    pub routes: usize,
    pub segments: usize,
    pub points: usize,
    pub concurrencies: usize,
}

pub struct Pipeline {
    db: Database,
    catalog: StateCatalog,
    source_options: SourceOptions,
    detector: ConcurrencyDetector,
}

impl Pipeline {
    pub fn new(db: Database, catalog: StateCatalog, config: &Config) -> Self {
        Self {
            db,
            catalog,
            source_options: config.source_options(),
            detector: ConcurrencyDetector::new(config.concurrency_threshold_m),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn catalog(&self) -> &StateCatalog {
        &self.catalog
    }

    pub fn profile(&self, state: &str) -> Result<&StateProfile, PipelineError> {
        self.catalog
            .get(state)
            .ok_or_else(|| PipelineError::UnknownState(state.to_string()))
    }

    /// Fetch a state's features and seed them. `source` overrides the
    /// catalog's source for this run.
    pub async fn seed_state(
        &self,
        state: &str,
        source: Option<SourceSpec>,
    ) -> Result<StateReport, PipelineError> {
        let profile = self.profile(state)?;
        let spec = source
            .or_else(|| profile.source.clone())
            .ok_or_else(|| PipelineError::NoSource(profile.identifier.clone()))?;

        let source_error = |source: SourceError| PipelineError::Source {
            state: profile.identifier.clone(),
            source,
        };
        // Fetch
        let source = FeatureSource::from_spec(&spec, self.source_options).map_err(source_error)?;
        info!(state = %profile.identifier, source = %source.describe(), "Fetching features");
        let features = source.fetch().await.map_err(source_error)?;

        self.seed_features(profile, features).await
    }

    /// Classify, assemble and store already-fetched features, then run the
    /// concurrency pass.
    pub async fn seed_features(
        &self,
        profile: &StateProfile,
        features: Vec<Feature>,
    ) -> Result<StateReport, PipelineError> {
        // Classify, with progress logged from a separate task
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let logger = tokio::spawn(log_progress(profile.identifier.clone(), progress_rx));

        let mut sink = move |event: ProgressEvent| {
            let _ = progress_tx.send(event);
        };
        let (buckets, stats) = classify_features(profile, features, &mut sink);
        drop(sink);
        if let Err(e) = logger.await {
            warn!(state = %profile.identifier, "Progress logger failed: {}", e);
        }

        for reason in [
            Discard::EmptyGeometry,
            Discard::UnsignedRoute,
            Discard::ZeroRouteNumber,
            Discard::Ramp,
            Discard::StateException,
            Discard::OversizedRouteNumber,
        ] {
            let count = stats.discarded_for(reason);
            if count > 0 {
                debug!(state = %profile.identifier, ?reason, count, "Discarded features");
            }
        }

        // Assemble
        let routes = buckets.len();
        let drafts = assemble_state(profile, buckets).inspect_err(|e| {
            error!(state = %profile.identifier, stage = "assemble", "{}", e);
        })?;

        // Write in one transaction
        let summary = write_state_segments(self.db.pool(), profile, &drafts)
            .await
            .map_err(|source| {
                error!(state = %profile.identifier, stage = "write", "Storage failure: {:#}", source);
                PipelineError::Storage {
                    state: profile.identifier.clone(),
                    stage: "write",
                    source,
                }
            })?;
        info!(
            state = %profile.identifier,
            routes,
            segments = summary.segments,
            points = summary.points,
            "Seeded segments"
        );

        // Concurrencies are detected from the committed rows
        let concurrencies = self.run_concurrencies(profile).await?;

        Ok(StateReport {
            state: profile.identifier.clone(),
            processed: stats.processed,
            retained: stats.retained,
            routes,
            segments: summary.segments,
            points: summary.points,
            concurrencies,
        })
    }

    /// Re-run only the concurrency pass over a state's stored segments.
    pub async fn detect_concurrencies(&self, state: &str) -> Result<usize, PipelineError> {
        let profile = self.profile(state)?;
        self.run_concurrencies(profile).await
    }

    async fn run_concurrencies(&self, profile: &StateProfile) -> Result<usize, PipelineError> {
        run_concurrency_pass(self.db.pool(), profile, &self.detector)
            .await
            .map_err(|source| {
                error!(state = %profile.identifier, stage = "concurrency", "Storage failure: {:#}", source);
                PipelineError::Storage {
                    state: profile.identifier.clone(),
                    stage: "concurrency",
                    source,
                }
            })
    }

    /// Seed every catalog state in order. States without a source are
    /// skipped; a failing state does not stop the others.
    pub async fn run_all(&self) -> Vec<(String, Result<StateReport, PipelineError>)> {
        let mut outcomes = Vec::new();
        for profile in &self.catalog.states {
            let outcome = self.seed_state(&profile.identifier, None).await;
            match &outcome {
                Ok(report) => info!(
                    state = %report.state,
                    segments = report.segments,
                    concurrencies = report.concurrencies,
                    "State seeded"
                ),
                Err(PipelineError::NoSource(state)) => {
                    warn!(state = %state, "No feature source, skipping")
                }
                Err(e) => error!(state = %profile.identifier, "State failed: {}", e),
            }
            outcomes.push((profile.identifier.clone(), outcome));
        }
        outcomes
    }
}

async fn log_progress(state: String, mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Started { total } => {
                info!(state = %state, total, "Classifying features")
            }
            ProgressEvent::Advanced {
                processed,
                retained,
            } => debug!(state = %state, processed, retained, "Classification progress"),
            ProgressEvent::Finished {
                processed,
                retained,
            } => info!(
                state = %state,
                processed,
                retained,
                filtered = processed - retained,
                "Classification finished"
            ),
        }
    }
}
