//! Verification Sub-flow - Spoken Sobriety Challenge
//!
//! Opened when the Intoxication signal activates and no challenge is open.
//! The driver is shown a short random phrase and must read it back.
//!
//! ## Lifecycle
//!
//! ```text
//! open ──(start listening)──► listening ──(transcript)──► Passed / Failed
//!   │                            │
//!   └──(deadline)──► Failed      └──(deadline)──► Failed (task cancelled)
//! ```
//!
//! - Deadline: `response_window_secs` after opening; starting to listen
//!   extends it to now + `listen_timeout_secs`.
//! - One attempt per challenge. A second start command is ignored.
//! - `cancel()` (manual reset) drops the speech task and the challenge.

mod speech;

pub use speech::{match_ratio, normalize_words, transcript_matches, ListenPoll, ListenTask};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::acquisition::{SpeechCapability, SpeechError};
use crate::config::VerificationConfig;
use crate::escalation::seconds as secs;

/// An open sobriety challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    /// Sobriety case this challenge belongs to
    pub case_id: u64,
    pub prompt_text: String,
    pub opened_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub attempts_used: u32,
}

/// Why a challenge ended without a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Mismatch { transcript: String, ratio: f64 },
    Expired,
    SpeechTimeout,
    CaptureFault(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Mismatch { transcript, ratio } => {
                write!(f, "heard '{}' ({:.0}% match)", transcript, ratio * 100.0)
            }
            FailureReason::Expired => write!(f, "no response before deadline"),
            FailureReason::SpeechTimeout => write!(f, "speech capture timed out"),
            FailureReason::CaptureFault(e) => write!(f, "audio capture fault: {}", e),
        }
    }
}

/// Terminal result of a challenge.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Passed { case_id: u64, transcript: String },
    Failed { case_id: u64, reason: FailureReason },
}

impl VerificationOutcome {
    pub fn case_id(&self) -> u64 {
        match self {
            VerificationOutcome::Passed { case_id, .. }
            | VerificationOutcome::Failed { case_id, .. } => *case_id,
        }
    }
}

/// Owns at most one open challenge and its listening task.
#[derive(Debug)]
pub struct VerificationFlow {
    config: VerificationConfig,
    rng: StdRng,
    challenge: Option<VerificationChallenge>,
    listening: Option<ListenTask>,
}

impl VerificationFlow {
    pub fn new(config: &VerificationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic prompts for tests and replays.
    pub fn with_seed(config: &VerificationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &VerificationConfig, rng: StdRng) -> Self {
        Self {
            config: config.clone(),
            rng,
            challenge: None,
            listening: None,
        }
    }

    pub fn challenge(&self) -> Option<&VerificationChallenge> {
        self.challenge.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.challenge.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.is_some()
    }

    /// `prompt_words` distinct words from the bank, space separated.
    pub fn generate_prompt(&mut self) -> String {
        let count = self.config.prompt_words.min(self.config.word_bank.len());
        self.config
            .word_bank
            .choose_multiple(&mut self.rng, count)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Open a challenge for `case_id` unless one is already open.
    pub fn open(&mut self, case_id: u64, now: DateTime<Utc>) -> Option<&VerificationChallenge> {
        if self.challenge.is_some() {
            return None;
        }
        let prompt_text = self.generate_prompt();
        info!(case_id, prompt = %prompt_text, "🗣️ Sobriety challenge opened, read the phrase aloud");
        self.challenge = Some(VerificationChallenge {
            case_id,
            prompt_text,
            opened_at: now,
            deadline: now + secs(self.config.response_window_secs),
            attempts_used: 0,
        });
        self.challenge.as_ref()
    }

    /// Operator "start listening". Returns false if there is nothing to
    /// listen for or the single attempt is already used.
    pub fn start_listening(&mut self, speech: Arc<dyn SpeechCapability>, now: DateTime<Utc>) -> bool {
        let Some(challenge) = self.challenge.as_mut() else {
            warn!("Start verification ignored: no open challenge");
            return false;
        };
        if challenge.attempts_used > 0 {
            warn!(case_id = challenge.case_id, "Start verification ignored: attempt already used");
            return false;
        }

        challenge.attempts_used = 1;
        challenge.deadline = now + secs(self.config.listen_timeout_secs);

        let timeout = Duration::from_secs_f64(self.config.listen_timeout_secs);
        match ListenTask::spawn(speech, timeout) {
            Ok(task) => {
                info!(case_id = challenge.case_id, "🎤 Listening for sobriety phrase");
                self.listening = Some(task);
            }
            Err(e) => {
                // Surfaces as a CaptureFault at the next poll
                warn!(error = %e, "Speech capture could not start");
                self.listening = None;
                challenge.deadline = now;
            }
        }
        true
    }

    /// Check for a finished transcript or an expired deadline.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<VerificationOutcome> {
        let challenge = self.challenge.as_ref()?;

        if let Some(task) = self.listening.as_mut() {
            if let ListenPoll::Finished(result) = task.poll() {
                let outcome = self.evaluate(result);
                self.close();
                return Some(outcome);
            }
        }

        if now >= challenge.deadline {
            let reason = if challenge.attempts_used > 0 && self.listening.is_none() {
                FailureReason::CaptureFault("speech capture did not start".to_string())
            } else if self.listening.is_some() {
                FailureReason::SpeechTimeout
            } else {
                FailureReason::Expired
            };
            let case_id = challenge.case_id;
            self.close();
            return Some(VerificationOutcome::Failed { case_id, reason });
        }

        None
    }

    /// Tear down the open challenge (reset). The speech task is cancelled.
    pub fn cancel(&mut self) {
        if let Some(challenge) = &self.challenge {
            info!(case_id = challenge.case_id, "Sobriety challenge cancelled");
        }
        self.close();
    }

    fn close(&mut self) {
        if let Some(task) = self.listening.take() {
            task.cancel();
        }
        self.challenge = None;
    }

    fn evaluate(&self, result: Result<String, SpeechError>) -> VerificationOutcome {
        let (case_id, prompt) = match &self.challenge {
            Some(c) => (c.case_id, c.prompt_text.as_str()),
            None => (0, ""),
        };
        match result {
            Ok(transcript) => {
                if transcript_matches(prompt, &transcript, self.config.min_word_match_ratio) {
                    VerificationOutcome::Passed { case_id, transcript }
                } else {
                    let ratio = match_ratio(prompt, &transcript);
                    VerificationOutcome::Failed {
                        case_id,
                        reason: FailureReason::Mismatch { transcript, ratio },
                    }
                }
            }
            Err(SpeechError::Timeout(_)) => VerificationOutcome::Failed {
                case_id,
                reason: FailureReason::SpeechTimeout,
            },
            Err(SpeechError::CaptureFault(e)) => VerificationOutcome::Failed {
                case_id,
                reason: FailureReason::CaptureFault(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct Echo(String);

    #[async_trait]
    impl SpeechCapability for Echo {
        async fn transcribe(&self, _timeout: Duration) -> Result<String, SpeechError> {
            Ok(self.0.clone())
        }
    }

    fn flow() -> VerificationFlow {
        VerificationFlow::with_seed(&VerificationConfig::default(), 7)
    }

    #[test]
    fn test_prompt_has_distinct_bank_words() {
        let mut flow = flow();
        let prompt = flow.generate_prompt();
        let words: Vec<&str> = prompt.split(' ').collect();
        assert_eq!(words.len(), 4);
        let unique: HashSet<&&str> = words.iter().collect();
        assert_eq!(unique.len(), 4);
        let bank = VerificationConfig::default().word_bank;
        assert!(words.iter().all(|w| bank.iter().any(|b| b == w)));
    }

    #[test]
    fn test_seeded_prompts_repeat() {
        assert_eq!(flow().generate_prompt(), flow().generate_prompt());
    }

    #[test]
    fn test_only_one_challenge_open() {
        let mut flow = flow();
        let now = Utc::now();
        assert!(flow.open(1, now).is_some());
        assert!(flow.open(2, now).is_none());
        assert_eq!(flow.challenge().map(|c| c.case_id), Some(1));
    }

    #[test]
    fn test_deadline_expiry_without_listening_fails() {
        let mut flow = flow();
        let now = Utc::now();
        flow.open(3, now);
        assert!(flow.poll(now + secs(5.9)).is_none());
        let outcome = flow.poll(now + secs(6.0));
        assert_eq!(
            outcome,
            Some(VerificationOutcome::Failed { case_id: 3, reason: FailureReason::Expired })
        );
        assert!(!flow.is_open());
    }

    #[tokio::test]
    async fn test_matching_transcript_passes() {
        let mut flow = flow();
        let now = Utc::now();
        let prompt = flow.open(4, now).map(|c| c.prompt_text.clone()).expect("opened");
        assert!(flow.start_listening(Arc::new(Echo(prompt.to_uppercase())), now));
        tokio::time::sleep(Duration::from_millis(20)).await;

        match flow.poll(now) {
            Some(VerificationOutcome::Passed { case_id, .. }) => assert_eq!(case_id, 4),
            other => panic!("expected pass, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listening_extends_deadline_and_allows_one_attempt() {
        let mut flow = flow();
        let now = Utc::now();
        flow.open(5, now);
        let later = now + secs(5.0);
        assert!(flow.start_listening(Arc::new(Echo("wrong words".into())), later));
        assert_eq!(flow.challenge().map(|c| c.deadline), Some(later + secs(15.0)));
        assert!(!flow.start_listening(Arc::new(Echo("again".into())), later));
    }

    #[tokio::test]
    async fn test_mismatch_fails() {
        let mut flow = flow();
        let now = Utc::now();
        flow.open(6, now);
        flow.start_listening(Arc::new(Echo("completely different".into())), now);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            flow.poll(now),
            Some(VerificationOutcome::Failed { reason: FailureReason::Mismatch { .. }, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_clears_challenge() {
        let mut flow = flow();
        let now = Utc::now();
        flow.open(7, now);
        flow.start_listening(Arc::new(Echo("x".into())), now);
        flow.cancel();
        assert!(!flow.is_open());
        assert!(!flow.is_listening());
        assert!(flow.poll(now + secs(100.0)).is_none());
    }
}
