//! The `ocr` subcommand.

use std::{sync::Arc, time::Duration};

use clap::Args;

use crate::{
    batch::{BatchOrchestrator, BatchSources},
    export::{ExportKind, write_exports},
    io::{read_text, write_jsonl},
    ocr::{
        invoker::{DEFAULT_MODEL, OcrInvoker},
        mistral::{ApiKey, MistralClient, api_key},
    },
    prelude::*,
    source::{FileType, SourceType, Upload},
    ui::{ProgressConfig, Ui},
};

/// OCR command line arguments.
#[derive(Debug, Args)]
pub struct OcrOpts {
    /// URLs or local file paths to process.
    #[clap(value_name = "INPUT")]
    pub inputs: Vec<String>,

    /// What kind of files are we processing?
    #[clap(long, value_enum, default_value_t = FileType::default())]
    pub file_type: FileType,

    /// Are our inputs URLs or local files?
    #[clap(long, value_enum, default_value_t = SourceType::default())]
    pub source_type: SourceType,

    /// Read additional URLs from this file, one per line. Use `-` for
    /// standard input.
    #[clap(long, value_name = "PATH")]
    pub url_list: Option<PathBuf>,

    /// MIME type of local images. Guessed from the file extension by
    /// default.
    #[clap(long)]
    pub mime_type: Option<String>,

    /// Mistral API key. Defaults to the `MISTRAL_API_KEY` environment
    /// variable.
    #[clap(long)]
    pub api_key: Option<ApiKey>,

    /// The OCR model to use.
    #[clap(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Milliseconds to wait after each successful request, to avoid rate
    /// limits.
    #[clap(long, default_value = "1000")]
    pub throttle_ms: u64,

    /// Export formats to write for each input.
    #[clap(
        long = "format",
        value_enum,
        value_delimiter = ',',
        default_values_t = ExportKind::ALL
    )]
    pub formats: Vec<ExportKind>,

    /// Directory for exported files.
    #[clap(long, default_value = "ocr_output")]
    pub out_dir: PathBuf,

    /// Where to write a JSONL summary of each input. Defaults to standard
    /// output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

impl OcrOpts {
    /// Gather our inputs into a batch.
    async fn batch_sources(&self) -> Result<BatchSources> {
        match self.source_type {
            SourceType::Url => {
                let mut text = self.inputs.join("\n");
                if let Some(path) = &self.url_list {
                    // Ignore the final newline of the file, so that it
                    // doesn't count as an empty URL.
                    let list = read_text(path).await?;
                    let list = list.trim_end_matches(['\r', '\n']);
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(list);
                }
                Ok(BatchSources::Urls(text))
            }
            SourceType::LocalUpload => {
                if self.url_list.is_some() {
                    warn!("Ignoring --url-list for local files");
                }
                let uploads = self
                    .inputs
                    .iter()
                    .map(|input| Upload::from_path(input, self.mime_type.as_deref()))
                    .collect();
                Ok(BatchSources::Uploads(uploads))
            }
        }
    }
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    // Nothing happens without credentials.
    let api_key = api_key(opts.api_key.as_ref().map(ApiKey::expose))?;

    let sources = opts.batch_sources().await?;

    let client = Arc::new(MistralClient::new(api_key)?);
    let invoker = OcrInvoker::new(client)
        .with_model(opts.model.clone())
        .with_throttle(Duration::from_millis(opts.throttle_ms));

    let pb = ui.new_batch_progress(&ProgressConfig {
        emoji: "📄",
        msg: "OCRing files",
        done_msg: "OCRed files",
    });
    let orchestrator = BatchOrchestrator::new(invoker).with_progress(pb.clone());
    let items = orchestrator
        .process_batch(sources, opts.file_type)
        .await
        .context("Cannot start OCR batch")?;
    pb.finish_using_style();

    let written = write_exports(&opts.out_dir, &items, &opts.formats).await?;
    let records = items
        .iter()
        .zip(written)
        .map(|(item, files)| item.to_output(files))
        .collect::<Vec<_>>();
    write_jsonl(opts.output_path.as_deref(), &records).await?;

    let failed = items.iter().filter(|item| item.failure.is_some()).count();
    if failed > 0 {
        warn!(failed, total = items.len(), "Some inputs could not be OCRed");
    } else {
        info!(total = items.len(), out_dir = %opts.out_dir.display(), "OCR complete");
    }
    Ok(())
}
