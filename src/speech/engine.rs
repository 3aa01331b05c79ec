use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SpeechError;

const ESPEAK_BINARY: &str = "espeak-ng";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageStatus {
    Supported,
    /// The engine knows the language but its voice data is not installed.
    MissingData,
    Unsupported,
}

/// Callbacks from the synthesizer, delivered over a channel so the owner
/// handles them in its own loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Initialized { ok: bool },
    UtteranceDone { utterance_id: String },
    UtteranceError { utterance_id: String, message: String },
}

/// A speech synthesizer speaking one utterance at a time.
#[async_trait]
pub trait SpeechEngine: Send {
    async fn set_language(&mut self, language: &str) -> LanguageStatus;

    /// Starts speaking `text`. Completion arrives later as an
    /// [`EngineEvent`] tagged with `utterance_id`.
    async fn speak(&mut self, text: &str, utterance_id: &str) -> Result<(), SpeechError>;

    /// Interrupts the current utterance, if any.
    async fn stop(&mut self);
}

/// Speaks through the `espeak-ng` command line synthesizer.
pub struct EspeakEngine {
    rate: u32,
    voice: String,
    events: mpsc::UnboundedSender<EngineEvent>,
    current: Option<JoinHandle<()>>,
}

impl EspeakEngine {
    /// Creates the engine and probes for the binary in the background; the
    /// result arrives as [`EngineEvent::Initialized`].
    pub fn spawn(rate: u32, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        let probe = events.clone();
        tokio::spawn(async move {
            let ok = Command::new(ESPEAK_BINARY)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|status| status.success())
                .unwrap_or(false);
            if !ok {
                tracing::error!("{} is not available", ESPEAK_BINARY);
            }
            let _ = probe.send(EngineEvent::Initialized { ok });
        });

        Self {
            rate,
            voice: "en".to_string(),
            events,
            current: None,
        }
    }

    async fn installed_voices() -> Vec<String> {
        let output = match Command::new(ESPEAK_BINARY).arg("--voices").output().await {
            Ok(output) if output.status.success() => output,
            _ => return Vec::new(),
        };
        parse_voice_list(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Language column of `espeak-ng --voices` output.
fn parse_voice_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|lang| lang.to_ascii_lowercase())
        .collect()
}

fn primary_subtag(language: &str) -> String {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[async_trait]
impl SpeechEngine for EspeakEngine {
    async fn set_language(&mut self, language: &str) -> LanguageStatus {
        let wanted = language.to_ascii_lowercase().replace('_', "-");
        let voices = Self::installed_voices().await;
        if voices.is_empty() {
            return LanguageStatus::MissingData;
        }

        let primary = primary_subtag(&wanted);
        let found = voices
            .iter()
            .find(|v| **v == wanted)
            .or_else(|| voices.iter().find(|v| primary_subtag(v) == primary));
        match found {
            Some(voice) => {
                self.voice = voice.clone();
                LanguageStatus::Supported
            }
            None => LanguageStatus::Unsupported,
        }
    }

    async fn speak(&mut self, text: &str, utterance_id: &str) -> Result<(), SpeechError> {
        self.stop().await;

        let mut child = Command::new(ESPEAK_BINARY)
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.rate.to_string())
            .arg("--")
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechError::Engine(format!("Failed to run {}: {}", ESPEAK_BINARY, e)))?;

        let events = self.events.clone();
        let utterance_id = utterance_id.to_string();
        self.current = Some(tokio::spawn(async move {
            let event = match child.wait().await {
                Ok(status) if status.success() => EngineEvent::UtteranceDone { utterance_id },
                Ok(status) => EngineEvent::UtteranceError {
                    utterance_id,
                    message: format!("{} exited with {}", ESPEAK_BINARY, status),
                },
                Err(e) => EngineEvent::UtteranceError {
                    utterance_id,
                    message: e.to_string(),
                },
            };
            let _ = events.send(event);
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        // Aborting drops the child, which kills it.
        if let Some(task) = self.current.take() {
            task.abort();
            let _ = task.await;
        }
    }
}
