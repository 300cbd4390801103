//! Incremental row-store writer.
//!
//! Every finished document appends one row group to the temp CSV. The append
//! and the `completed` increment happen under the run's progress lock, so
//! concurrent workers never interleave row groups and the counter always
//! matches what is on disk.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::context::{FailureReason, RunContext};
use crate::questions::QuestionBank;
use crate::tabular::LONG_HEADER;

pub const MAX_WRITE_ATTEMPTS: u32 = 5;
pub const WRITE_RETRY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
#[error("failed to save results after {attempts} attempts: {last}")]
pub struct SaveFailed {
    pub attempts: u32,
    pub last: WriteError,
}

#[derive(Debug, Clone)]
pub struct ResultWriter {
    path: PathBuf,
    retry_pause: Duration,
}

impl ResultWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry_pause: WRITE_RETRY_PAUSE,
        }
    }

    /// Override the pause between failed attempts.
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row per question for `document` and count it as completed.
    ///
    /// Missing answers are written as empty cells so every document has
    /// exactly `bank.len()` rows. After [`MAX_WRITE_ATTEMPTS`] failures the
    /// document is still counted, and a `save failed` entry is recorded.
    pub async fn write_document(
        &self,
        ctx: &RunContext,
        document: &str,
        bank: &QuestionBank,
        answers: &[String],
    ) -> Result<(), SaveFailed> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let mut progress = ctx.lock_progress();
                self.append_group(document, bank, answers)
                    .map(|()| RunContext::complete_locked(&mut progress))
            };

            match result {
                Ok((completed, total)) => {
                    ctx.notify_progress(completed, total);
                    tracing::debug!(document, rows = bank.len(), "row group written");
                    return Ok(());
                }
                Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(document, attempt, error = %e, "row group write failed, retrying");
                    tokio::time::sleep(self.retry_pause).await;
                }
                Err(e) => {
                    ctx.log(
                        format!("FAILED to save results after {attempt} attempts: {e}"),
                        true,
                    );
                    ctx.fail_and_complete(document, FailureReason::SaveFailed);
                    return Err(SaveFailed {
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }

    /// Encode the whole group in memory, then append it in one write. A
    /// failed write is cut back so a retry never duplicates rows.
    fn append_group(
        &self,
        document: &str,
        bank: &QuestionBank,
        answers: &[String],
    ) -> Result<(), WriteError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let with_header = file.metadata()?.len() == 0;
        let group = encode_group(document, bank, answers, with_header)?;
        append_or_truncate(&mut file, &group)?;
        Ok(())
    }
}

fn encode_group(
    document: &str,
    bank: &QuestionBank,
    answers: &[String],
    with_header: bool,
) -> Result<Vec<u8>, WriteError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        writer.write_record(LONG_HEADER)?;
    }
    for (i, question) in bank.iter().enumerate() {
        let answer = answers.get(i).map(String::as_str).unwrap_or("");
        writer.write_record([document, question.text.as_str(), answer])?;
    }
    writer
        .into_inner()
        .map_err(|e| WriteError::Io(e.into_error()))
}

/// An append target that can be cut back to an earlier length.
trait Truncate: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn append_or_truncate<W: Truncate>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    let start = out.current_len()?;
    let result = out.write_all(bytes).and_then(|()| out.flush());
    if let Err(e) = result {
        if let Err(cut) = out.truncate_to(start) {
            tracing::warn!(error = %cut, "could not roll back partial row group");
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProgressEvent;
    use crate::tabular::read_long_table;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context() -> Arc<RunContext> {
        Arc::new(RunContext::new(
            Arc::new(|_: ProgressEvent| {}),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn first_write_creates_header() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("temp.csv"));
        let ctx = context();
        ctx.begin(1);
        let bank = QuestionBank::from_texts(["Q1?", "Q2?"]);

        writer
            .write_document(&ctx, "a.pdf", &bank, &["yes".into(), "no".into()])
            .await
            .unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(content, "PDF File,Question,Answer\na.pdf,Q1?,yes\na.pdf,Q2?,no\n");
        assert_eq!(ctx.snapshot().completed, 1);
    }

    #[tokio::test]
    async fn short_answer_list_is_padded() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("temp.csv"));
        let ctx = context();
        let bank = QuestionBank::from_texts(["Q1?", "Q2?", "Q3?"]);

        writer
            .write_document(&ctx, "a.pdf", &bank, &["only".into()])
            .await
            .unwrap();

        let rows = read_long_table(writer.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].answer, "");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_lose_rows() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(ResultWriter::new(dir.path().join("temp.csv")));
        let ctx = context();
        let bank = Arc::new(QuestionBank::from_texts(["Q1?", "Q2?", "Q3?"]));
        let writers = 8;
        let calls_each = 5;
        ctx.begin(writers * calls_each);

        let mut handles = Vec::new();
        for w in 0..writers {
            let (writer, ctx, bank) = (writer.clone(), ctx.clone(), bank.clone());
            handles.push(tokio::spawn(async move {
                for c in 0..calls_each {
                    let answers = vec![format!("{w}-{c}"); 3];
                    writer
                        .write_document(&ctx, &format!("w{w}/doc{c}.pdf"), &bank, &answers)
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let rows = read_long_table(writer.path()).unwrap();
        assert_eq!(rows.len(), writers * calls_each * 3);
        assert_eq!(ctx.snapshot().completed, writers * calls_each);

        // Row groups stay contiguous.
        for group in rows.chunks(3) {
            assert!(group.iter().all(|r| r.document == group[0].document));
        }
    }

    /// Accepts `room` bytes, then fails every write.
    struct ShortWrite {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for ShortWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for ShortWrite {
        fn current_len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn partial_append_is_rolled_back() {
        let mut out = ShortWrite {
            data: b"PDF File,Question,Answer\n".to_vec(),
            room: 10,
        };
        let bank = QuestionBank::from_texts(["Q1?", "Q2?"]);
        let group = encode_group("a.pdf", &bank, &["yes".into(), "no".into()], false).unwrap();

        assert!(append_or_truncate(&mut out, &group).is_err());
        assert_eq!(out.data, b"PDF File,Question,Answer\n");

        out.room = usize::MAX;
        append_or_truncate(&mut out, &group).unwrap();
        assert_eq!(
            String::from_utf8(out.data).unwrap(),
            "PDF File,Question,Answer\na.pdf,Q1?,yes\na.pdf,Q2?,no\n"
        );
    }

    #[tokio::test]
    async fn observer_sees_progress_after_the_lock_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path().join("temp.csv"));
        let slot: Arc<std::sync::OnceLock<Arc<RunContext>>> = Arc::new(std::sync::OnceLock::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observer = {
            let (slot, seen) = (Arc::clone(&slot), Arc::clone(&seen));
            move |event: ProgressEvent| {
                if let ProgressEvent::Progress { .. } = event
                    && let Some(ctx) = slot.get()
                {
                    seen.lock().unwrap().push(ctx.snapshot().completed);
                }
            }
        };
        let ctx = Arc::new(RunContext::new(Arc::new(observer), CancellationToken::new()));
        slot.set(Arc::clone(&ctx)).unwrap();
        ctx.begin(1);

        writer
            .write_document(&ctx, "a.pdf", &QuestionBank::from_texts(["Q?"]), &[])
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_store_counts_and_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every open fail.
        let path = dir.path().join("temp.csv");
        std::fs::create_dir(&path).unwrap();
        let writer = ResultWriter::new(&path);
        let ctx = context();
        ctx.begin(1);
        let bank = QuestionBank::from_texts(["Q1?"]);

        let err = writer
            .write_document(&ctx, "a.pdf", &bank, &["x".into()])
            .await
            .unwrap_err();

        assert_eq!(err.attempts, MAX_WRITE_ATTEMPTS);
        let state = ctx.snapshot();
        assert_eq!(state.completed, 1);
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].reason, FailureReason::SaveFailed);
    }
}
