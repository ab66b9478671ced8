//! Batch extraction pipeline: one generic driver run per dataset, checkpointed per item.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pieces_adapters::{adapter_for_dataset, DatasetAdapter};
use pieces_core::{DatasetKind, ExtractionRecord, ResultMapping};
use pieces_inference::{ChatBackend, Extractor, InferenceConfig, OpenAiCompatClient};
use pieces_storage::{to_indented_json, JsonCheckpoint};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pieces-sync";

const REGISTRY_FILE: &str = "datasets.yaml";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workspace_root: PathBuf,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            llm_base_url: std::env::var("PIECES_LLM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1/".to_string()),
            llm_api_key: std::env::var("PIECES_LLM_API_KEY").unwrap_or_else(|_| "ollama".to_string()),
            llm_model: std::env::var("PIECES_LLM_MODEL")
                .unwrap_or_else(|_| pieces_inference::extractor::DEFAULT_MODEL.to_string()),
            http_timeout_secs: std::env::var("PIECES_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0),
            user_agent: std::env::var("PIECES_USER_AGENT")
                .unwrap_or_else(|_| "pieces-extractor/0.1".to_string()),
            input_dir: std::env::var("PIECES_INPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("original")),
            output_dir: std::env::var("PIECES_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("parsed")),
            workspace_root: std::env::var("PIECES_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            base_url: self.llm_base_url.clone(),
            api_key: self.llm_api_key.clone(),
            timeout: self.http_timeout_secs.map(Duration::from_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn resolved_input_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.input_dir)
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        self.workspace_root.join(&self.output_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRegistry {
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub dataset: DatasetKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub output: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl DatasetRegistry {
    /// fs, pstreet, cipi, audio; all enabled, default output names.
    pub fn builtin() -> Self {
        Self {
            datasets: DatasetKind::RUN_ORDER
                .into_iter()
                .map(|dataset| DatasetConfig {
                    dataset,
                    enabled: true,
                    output: None,
                })
                .collect(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing dataset registry")
    }

    /// `datasets.yaml` under `root`, or the built-in registry when the file is absent.
    pub async fn load_or_builtin(root: &Path) -> Result<Self> {
        let path = root.join(REGISTRY_FILE);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            return Ok(Self::builtin());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Enabled datasets in run order, optionally narrowed to one.
    pub fn planned(&self, selection: Option<DatasetKind>) -> Vec<&DatasetConfig> {
        self.datasets
            .iter()
            .filter(|d| d.enabled)
            .filter(|d| selection.map_or(true, |only| d.dataset == only))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetRunSummary {
    pub dataset: DatasetKind,
    pub items: usize,
    pub parse_failures: usize,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub datasets: Vec<DatasetRunSummary>,
}

impl PipelineRunSummary {
    pub fn total_items(&self) -> usize {
        self.datasets.iter().map(|d| d.items).sum()
    }

    pub fn total_parse_failures(&self) -> usize {
        self.datasets.iter().map(|d| d.parse_failures).sum()
    }
}

/// Runs one dataset: build query, extract, merge, checkpoint, for every entry.
pub struct BatchDriver<'a> {
    extractor: &'a Extractor,
}

impl<'a> BatchDriver<'a> {
    pub fn new(extractor: &'a Extractor) -> Self {
        Self { extractor }
    }

    /// Any error aborts the run. The output file then holds exactly the items
    /// completed before the failing one.
    pub async fn run(&self, adapter: &dyn DatasetAdapter, output_path: &Path) -> Result<DatasetRunSummary> {
        let kind = adapter.kind();
        let span = info_span!("dataset_run", dataset = %kind);

        async {
            let entries = adapter
                .load_entries()
                .with_context(|| format!("loading {kind} index"))?;
            let total = entries.len();
            info!(entries = total, output = %output_path.display(), "starting dataset");

            let checkpoint = JsonCheckpoint::new(output_path);
            let mut results = ResultMapping::new();
            let mut parse_failures = 0usize;

            for (position, entry) in entries.iter().enumerate() {
                let item = adapter
                    .build_item(entry)
                    .with_context(|| format!("building query for {kind} entry `{}`", entry.key))?;
                let mut record = self
                    .extractor
                    .extract(&item.query)
                    .await
                    .with_context(|| format!("extracting {kind} entry `{}`", item.key))?;

                if let Some(composer) = item.known_composer {
                    record.composer = composer;
                }
                if record.is_parse_failure() {
                    parse_failures += 1;
                }

                info!(
                    key = %item.key,
                    position = position + 1,
                    total,
                    record = %render_record(&record),
                    "extracted"
                );

                results.insert(item.key, record);
                checkpoint
                    .write(&results)
                    .await
                    .with_context(|| format!("checkpointing {kind} results"))?;
            }

            info!(items = results.len(), parse_failures, "dataset complete");
            Ok(DatasetRunSummary {
                dataset: kind,
                items: results.len(),
                parse_failures,
                output_path: output_path.to_path_buf(),
            })
        }
        .instrument(span)
        .await
    }
}

pub fn render_record(record: &ExtractionRecord) -> String {
    to_indented_json(record)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| format!("{record:?}"))
}

pub struct ExtractionPipeline {
    config: PipelineConfig,
    registry: DatasetRegistry,
    extractor: Extractor,
}

impl ExtractionPipeline {
    /// Builds the one HTTP client shared by every dataset in the run.
    pub fn new(config: PipelineConfig, registry: DatasetRegistry) -> Result<Self> {
        let client = OpenAiCompatClient::new(config.inference_config())
            .context("building chat-completion client")?;
        Ok(Self::with_backend(config, registry, Arc::new(client)))
    }

    pub fn with_backend(
        config: PipelineConfig,
        registry: DatasetRegistry,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        let extractor = Extractor::new(backend, config.llm_model.clone());
        Self {
            config,
            registry,
            extractor,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn output_path_for(&self, dataset: &DatasetConfig, adapter: &dyn DatasetAdapter) -> PathBuf {
        let file = dataset
            .output
            .as_deref()
            .unwrap_or_else(|| adapter.default_output_file());
        self.config.resolved_output_dir().join(file)
    }

    pub async fn run_once(&self, selection: Option<DatasetKind>) -> Result<PipelineRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let input_dir = self.config.resolved_input_dir();
        let planned = self.registry.planned(selection);
        info!(%run_id, datasets = planned.len(), model = %self.extractor.model(), "pipeline run starting");

        let driver = BatchDriver::new(&self.extractor);
        let mut datasets = Vec::with_capacity(planned.len());
        for dataset in planned {
            let adapter = adapter_for_dataset(dataset.dataset, &input_dir);
            let output_path = self.output_path_for(dataset, adapter.as_ref());
            let summary = driver
                .run(adapter.as_ref(), &output_path)
                .await
                .with_context(|| format!("dataset {} failed", dataset.dataset))?;
            datasets.push(summary);
        }

        Ok(PipelineRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            datasets,
        })
    }
}

pub async fn run_pipeline_from_env(selection: Option<DatasetKind>) -> Result<PipelineRunSummary> {
    let config = PipelineConfig::from_env();
    let registry = DatasetRegistry::load_or_builtin(&config.workspace_root).await?;
    let pipeline = ExtractionPipeline::new(config, registry)?;
    pipeline.run_once(selection).await
}

pub async fn extract_title_from_env(title: &str) -> Result<ExtractionRecord> {
    let config = PipelineConfig::from_env();
    let pipeline = ExtractionPipeline::new(config, DatasetRegistry::builtin())?;
    pipeline
        .extractor()
        .extract(title)
        .await
        .with_context(|| format!("extracting `{title}`"))
}
