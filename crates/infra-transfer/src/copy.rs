// Chunked stream copy with throttling, progress, cancellation and checkpoints
use crate::throttle::BandwidthThrottle;
use std::io::{self, Read, Write};
use tidesync_core::domain::{percent_of, TransferProgress};
use tidesync_core::port::{CancelToken, ProgressCallback, TransferError, TransferResult};

/// Files at or below this size only get the final 100% notification
pub const PROGRESS_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// Flush and checkpoint at least this often
pub const CHECKPOINT_INTERVAL_BYTES: u64 = 4 * 1024 * 1024;

/// Monotonic per-file progress notifications
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    file: String,
    total: u64,
    last_percent: Option<u8>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>, file: impl Into<String>, total: u64) -> Self {
        Self {
            callback,
            file: file.into(),
            total,
            last_percent: None,
        }
    }

    /// Notify if the percentage moved forward (large files only)
    pub fn update(&mut self, position: u64) {
        if self.total <= PROGRESS_THRESHOLD_BYTES {
            return;
        }
        let percent = percent_of(position, self.total);
        if percent == 100 || self.last_percent.is_some_and(|last| percent <= last) {
            return;
        }
        self.emit(position, percent);
    }

    /// Always delivered once the file is fully written
    pub fn finish(&mut self) {
        if self.last_percent != Some(100) {
            self.emit(self.total, 100);
        }
    }

    fn emit(&mut self, position: u64, percent: u8) {
        self.last_percent = Some(percent);
        if let Some(callback) = &self.callback {
            let mut progress = TransferProgress::new(self.file.clone(), position, self.total);
            progress.percent = percent;
            callback(progress);
        }
    }
}

/// Per-file copy settings
pub struct CopyControl<'a> {
    pub buffer_size: usize,
    pub throttle: Option<BandwidthThrottle>,
    pub progress: ProgressReporter,
    pub cancel: Option<&'a CancelToken>,
    /// Called with the absolute committed offset after each flush
    pub on_commit: Option<Box<dyn FnMut(u64) + 'a>>,
}

impl CopyControl<'_> {
    fn commit(&mut self, writer: &mut dyn Write, position: u64) -> io::Result<()> {
        writer.flush()?;
        if let Some(on_commit) = self.on_commit.as_mut() {
            on_commit(position);
        }
        Ok(())
    }
}

/// Copy `reader` into `writer` starting at absolute offset `start`.
///
/// Returns the number of bytes copied by this call. Cancellation is checked
/// after every chunk; on cancel the written prefix is flushed and committed
/// before `Cancelled` is returned.
pub fn copy_chunks(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    start: u64,
    control: &mut CopyControl<'_>,
) -> TransferResult<u64> {
    let mut buf = vec![0u8; control.buffer_size.max(1)];
    let mut position = start;
    let mut last_commit = start;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if position > last_commit {
                    let _ = control.commit(writer, position);
                }
                return Err(TransferError::from(e).context("read"));
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| TransferError::from(e).context("write"))?;
        position += n as u64;

        control.progress.update(position);
        if let Some(throttle) = control.throttle.as_mut() {
            throttle.pace(n as u64);
        }
        if position - last_commit >= CHECKPOINT_INTERVAL_BYTES {
            control.commit(writer, position)?;
            last_commit = position;
        }
        if control.cancel.is_some_and(CancelToken::is_cancelled) {
            control.commit(writer, position)?;
            return Err(TransferError::cancelled());
        }
    }

    writer.flush()?;
    control.progress.finish();
    Ok(position - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tidesync_core::port::TransferErrorKind;

    fn recording() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));
        (callback, seen)
    }

    fn control<'a>(callback: ProgressCallback, total: u64, chunk: usize) -> CopyControl<'a> {
        CopyControl {
            buffer_size: chunk,
            throttle: None,
            progress: ProgressReporter::new(Some(callback), "f.bin", total),
            cancel: None,
            on_commit: None,
        }
    }

    #[test]
    fn test_large_file_progress_is_monotonic_and_complete() {
        let data = vec![1u8; 3 * 1024 * 1024];
        let (callback, seen) = recording();
        let mut ctl = control(callback, data.len() as u64, 64 * 1024);
        let mut out = Vec::new();

        let copied = copy_chunks(&mut &data[..], &mut out, 0, &mut ctl).unwrap();
        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);

        let seen = seen.lock().unwrap();
        assert!(seen.len() > 10);
        assert!(seen.windows(2).all(|w| w[0].percent < w[1].percent));
        assert_eq!(seen.last().unwrap().percent, 100);
        assert_eq!(seen.iter().filter(|p| p.percent == 100).count(), 1);
    }

    #[test]
    fn test_small_file_only_reports_completion() {
        let data = vec![2u8; 1000];
        let (callback, seen) = recording();
        let mut ctl = control(callback, 1000, 100);
        copy_chunks(&mut &data[..], &mut Vec::new(), 0, &mut ctl).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_complete());
    }

    #[test]
    fn test_cancel_commits_written_prefix() {
        let data = vec![3u8; 10_000];
        let token = CancelToken::new();
        token.cancel();
        let committed = Arc::new(Mutex::new(None));
        let record = Arc::clone(&committed);
        let (callback, _) = recording();
        let mut ctl = control(callback, 10_000, 1_000);
        ctl.cancel = Some(&token);
        ctl.on_commit = Some(Box::new(move |pos| *record.lock().unwrap() = Some(pos)));

        let mut out = Vec::new();
        let err = copy_chunks(&mut &data[..], &mut out, 500, &mut ctl).unwrap_err();
        assert_eq!(err.kind, TransferErrorKind::Cancelled);
        assert_eq!(out.len(), 1_000);
        assert_eq!(*committed.lock().unwrap(), Some(1_500));
    }
}
