//! Listening task and transcript matching.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::acquisition::{SpeechCapability, SpeechError};

/// Result of polling a listening task at a tick boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenPoll {
    Pending,
    Finished(Result<String, SpeechError>),
}

/// A speech capture running off the frame loop.
///
/// The transcript comes back through a oneshot channel that the tick polls
/// without waiting. Cancelling (or dropping) the task drops the capture
/// future, which releases the audio device.
#[derive(Debug)]
pub struct ListenTask {
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<String, SpeechError>>,
    handle: JoinHandle<()>,
}

impl ListenTask {
    /// Spawn `speech.transcribe(timeout)` on the current tokio runtime.
    pub fn spawn(speech: Arc<dyn SpeechCapability>, timeout: Duration) -> Result<Self, SpeechError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SpeechError::CaptureFault(format!("no async runtime: {e}")))?;

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let (tx, rx) = oneshot::channel();

        let handle = runtime.spawn(async move {
            let result = tokio::select! {
                _ = child.cancelled() => {
                    debug!("Speech capture cancelled");
                    return;
                }
                r = speech.transcribe(timeout) => r,
            };
            // Receiver gone means the challenge was torn down
            let _ = tx.send(result);
        });

        Ok(Self {
            cancel,
            result: rx,
            handle,
        })
    }

    pub fn poll(&mut self) -> ListenPoll {
        match self.result.try_recv() {
            Ok(result) => ListenPoll::Finished(result),
            Err(oneshot::error::TryRecvError::Empty) => ListenPoll::Pending,
            // Sender dropped without a value: the capture task panicked
            Err(oneshot::error::TryRecvError::Closed) => ListenPoll::Finished(Err(
                SpeechError::CaptureFault("speech task ended without a transcript".to_string()),
            )),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl Drop for ListenTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Transcript Matching
// ============================================================================

/// Lower-case, strip punctuation, split on whitespace.
pub fn normalize_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Fraction of distinct prompt words present in the transcript.
pub fn match_ratio(prompt: &str, transcript: &str) -> f64 {
    let expected: HashSet<String> = normalize_words(prompt).into_iter().collect();
    if expected.is_empty() {
        return 0.0;
    }
    let spoken: HashSet<String> = normalize_words(transcript).into_iter().collect();
    expected.intersection(&spoken).count() as f64 / expected.len() as f64
}

/// True when enough prompt words were heard. Empty transcripts never match.
pub fn transcript_matches(prompt: &str, transcript: &str, min_ratio: f64) -> bool {
    if normalize_words(transcript).is_empty() {
        return false;
    }
    match_ratio(prompt, transcript) + 1e-9 >= min_ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[test]
    fn test_normalize_strips_case_and_punctuation() {
        assert_eq!(
            normalize_words("Apple, BANANA!  guitar... kitchen?"),
            vec!["apple", "banana", "guitar", "kitchen"]
        );
    }

    #[test]
    fn test_match_ratio_three_of_four_passes() {
        let prompt = "apple banana guitar kitchen";
        assert!((match_ratio(prompt, "apple banana guitar") - 0.75).abs() < 1e-12);
        assert!(transcript_matches(prompt, "Apple banana, guitar.", 0.75));
        assert!(!transcript_matches(prompt, "apple banana", 0.75));
    }

    #[test]
    fn test_word_order_is_ignored() {
        assert!(transcript_matches("apple banana guitar kitchen", "kitchen guitar banana apple", 1.0));
    }

    #[test]
    fn test_empty_transcript_never_matches() {
        assert!(!transcript_matches("apple", "", 0.0001));
        assert!(!transcript_matches("apple", " ,.! ", 0.0001));
    }

    struct FixedSpeech(&'static str);

    #[async_trait]
    impl SpeechCapability for FixedSpeech {
        async fn transcribe(&self, _timeout: Duration) -> Result<String, SpeechError> {
            Ok(self.0.to_string())
        }
    }

    struct NeverSpeaks;

    #[async_trait]
    impl SpeechCapability for NeverSpeaks {
        async fn transcribe(&self, timeout: Duration) -> Result<String, SpeechError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(SpeechError::Timeout(timeout))
        }
    }

    #[tokio::test]
    async fn test_listen_task_delivers_transcript() {
        let mut task = ListenTask::spawn(Arc::new(FixedSpeech("hello")), Duration::from_secs(1))
            .expect("runtime present");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.poll(), ListenPoll::Finished(Ok("hello".to_string())));
    }

    #[tokio::test]
    async fn test_cancelled_task_reports_closed() {
        let mut task = ListenTask::spawn(Arc::new(NeverSpeaks), Duration::from_secs(1))
            .expect("runtime present");
        assert_eq!(task.poll(), ListenPoll::Pending);
        task.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(task.poll(), ListenPoll::Finished(Err(SpeechError::CaptureFault(_)))));
    }

    #[test]
    fn test_spawn_outside_runtime_is_capture_fault() {
        let result = ListenTask::spawn(Arc::new(FixedSpeech("x")), Duration::from_secs(1));
        assert!(matches!(result, Err(SpeechError::CaptureFault(_))));
    }
}
