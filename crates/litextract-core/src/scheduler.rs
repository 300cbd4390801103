//! Batch scheduling: split documents into batches and run one batch per
//! worker task, each batch strictly sequential.
//!
//! Workers pull [`BatchJob`]s from a shared `async_channel` queue. A worker
//! checks the cancellation token before every document; once it is set no
//! new document starts, while a document already in flight runs to the end
//! of its current request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::Config;
use crate::backend::{PdfBackend, extract_text_blocking};
use crate::client::{ExtractionClient, RequestSettings, build_request};
use crate::context::{FailureReason, RunContext};
use crate::parser::parse_answers;
use crate::questions::QuestionBank;
use crate::retry::{ExtractError, RetryPolicy, query_with_retry};
use crate::writer::ResultWriter;

/// Split `documents` into at most `max_workers` contiguous batches of
/// near-equal size (ceiling division). Never yields an empty batch.
pub fn make_batches(documents: Vec<String>, max_workers: usize) -> Vec<Vec<String>> {
    if documents.is_empty() {
        return Vec::new();
    }
    let size = documents.len().div_ceil(max_workers.max(1));
    documents.chunks(size).map(<[String]>::to_vec).collect()
}

/// What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Rows written, nothing to report.
    Written,
    /// Rows written, but at least one failure was recorded. Carries the first.
    Flagged(FailureReason),
    /// No rows written; the failure was recorded and the document counted.
    Failed(FailureReason),
    /// Cancelled before a reply arrived. Not counted, left for the next run.
    Stopped,
}

/// Everything needed to take one document from file to rows.
pub struct DocumentProcessor {
    pdf_root: PathBuf,
    bank: Arc<QuestionBank>,
    client: Arc<dyn ExtractionClient>,
    backend: Arc<dyn PdfBackend>,
    writer: ResultWriter,
    settings: RequestSettings,
    policy: RetryPolicy,
}

impl DocumentProcessor {
    pub fn new(
        pdf_root: impl Into<PathBuf>,
        bank: Arc<QuestionBank>,
        client: Arc<dyn ExtractionClient>,
        backend: Arc<dyn PdfBackend>,
        writer: ResultWriter,
        config: &Config,
    ) -> Self {
        Self {
            pdf_root: pdf_root.into(),
            bank,
            client,
            backend,
            writer,
            settings: RequestSettings::from_config(config),
            policy: RetryPolicy::from_config(config),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn writer(&self) -> &ResultWriter {
        &self.writer
    }

    pub async fn process_document(
        &self,
        batch_id: usize,
        document: &str,
        ctx: &RunContext,
    ) -> DocumentOutcome {
        let name = display_name(document);
        ctx.log(format!("Batch {}: Processing {name}", batch_id + 1), false);

        let path = self.pdf_root.join(document);
        let text = match extract_text_blocking(Arc::clone(&self.backend), path.clone()).await {
            Ok(text) => text,
            Err(e) => {
                ctx.log(format!("Error reading {}: {e}", path.display()), true);
                String::new()
            }
        };
        if text.trim().is_empty() {
            ctx.log(format!("Skipping (empty text): {name}"), true);
            ctx.fail_and_complete(document, FailureReason::EmptyText);
            return DocumentOutcome::Failed(FailureReason::EmptyText);
        }

        let request = build_request(&self.settings, &text, &self.bank);
        let response =
            match query_with_retry(self.client.as_ref(), &request, &self.policy, ctx).await {
                Ok(response) => response,
                Err(ExtractError::Cancelled) => {
                    tracing::debug!(document, "stopped before a reply arrived");
                    return DocumentOutcome::Stopped;
                }
                Err(e) => {
                    ctx.log(format!("ERROR processing {name}: {e}"), true);
                    ctx.fail_and_complete(document, FailureReason::CriticalError);
                    return DocumentOutcome::Failed(FailureReason::CriticalError);
                }
            };

        let mut flagged = None;
        let reply = match response.content() {
            Ok(reply) => reply,
            Err(e) => {
                ctx.log(format!("Error extracting answers: {e}"), true);
                ctx.record_failure(document, FailureReason::ApiResponseError);
                flagged = Some(FailureReason::ApiResponseError);
                ""
            }
        };

        let answers = parse_answers(reply, self.bank.len());
        if answers.iter().all(String::is_empty) {
            ctx.log(format!("WARNING - No answers parsed: {name}"), true);
            ctx.record_failure(document, FailureReason::NoAnswersParsed);
            flagged = flagged.or(Some(FailureReason::NoAnswersParsed));
        }

        if self
            .writer
            .write_document(ctx, document, &self.bank, &answers)
            .await
            .is_err()
        {
            return DocumentOutcome::Failed(FailureReason::SaveFailed);
        }

        tracing::info!(document, questions = self.bank.len(), "document processed");
        flagged.map_or(DocumentOutcome::Written, DocumentOutcome::Flagged)
    }
}

fn display_name(document: &str) -> &str {
    Path::new(document)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(document)
}

/// One batch submitted to the pool.
pub struct BatchJob {
    pub batch_id: usize,
    pub documents: Vec<String>,
}

/// Fixed set of worker tasks draining a shared batch queue.
///
/// Submit jobs via [`submit()`](BatchPool::submit), then call
/// [`shutdown()`](BatchPool::shutdown) to wait for every worker.
pub struct BatchPool {
    job_tx: async_channel::Sender<BatchJob>,
    handles: Vec<JoinHandle<()>>,
}

impl BatchPool {
    pub fn new(
        processor: Arc<DocumentProcessor>,
        ctx: Arc<RunContext>,
        num_workers: usize,
    ) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<BatchJob>();
        let handles = (0..num_workers.max(1))
            .map(|_| {
                tokio::spawn(worker_loop(
                    job_rx.clone(),
                    Arc::clone(&processor),
                    Arc::clone(&ctx),
                ))
            })
            .collect();
        Self { job_tx, handles }
    }

    pub async fn submit(&self, job: BatchJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for all workers to finish.
    pub async fn shutdown(self) {
        self.job_tx.close();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "batch worker panicked");
            }
        }
    }
}

async fn worker_loop(
    rx: async_channel::Receiver<BatchJob>,
    processor: Arc<DocumentProcessor>,
    ctx: Arc<RunContext>,
) {
    while let Ok(job) = rx.recv().await {
        if ctx.is_cancelled() {
            tracing::debug!(batch = job.batch_id + 1, "skipping batch: cancelled");
            continue;
        }
        run_batch(job, &processor, &ctx).await;
    }
}

async fn run_batch(job: BatchJob, processor: &DocumentProcessor, ctx: &RunContext) {
    for document in &job.documents {
        if ctx.is_cancelled() {
            ctx.log("Stopping batch processing...", false);
            break;
        }
        processor.process_document(job.batch_id, document, ctx).await;
    }
}

/// Run every batch on its own worker and wait for all of them.
pub async fn run_batches(
    batches: Vec<Vec<String>>,
    processor: Arc<DocumentProcessor>,
    ctx: Arc<RunContext>,
) {
    let pool = BatchPool::new(processor, ctx, batches.len());
    for (batch_id, documents) in batches.into_iter().enumerate() {
        pool.submit(BatchJob {
            batch_id,
            documents,
        })
        .await;
    }
    pool.shutdown().await;
}
