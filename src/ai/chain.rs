use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AiFeatures;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiStageKind {
    Cleaning,
    Summarization,
    Translation,
}

impl AiStageKind {
    /// Fixed execution order of the chain.
    pub const ORDER: [AiStageKind; 3] = [
        AiStageKind::Cleaning,
        AiStageKind::Summarization,
        AiStageKind::Translation,
    ];

    pub fn enabled(features: &AiFeatures) -> Vec<AiStageKind> {
        Self::ORDER
            .into_iter()
            .filter(|kind| match kind {
                AiStageKind::Cleaning => features.cleaning,
                AiStageKind::Summarization => features.summarization,
                AiStageKind::Translation => features.auto_translate,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> AiStageKind;

    /// Processes every article currently waiting for this stage. Should return
    /// early once `cancel` fires.
    async fn run(&self, cancel: &CancellationToken) -> Result<StageReport>;
}

/// Fire-and-forget entry point used once extraction drains.
pub trait ChainTrigger: Send + Sync {
    fn submit(&self, stages: Vec<AiStageKind>);
}

struct RunningChain {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A single logical chain of AI stages. Submitting replaces whatever chain is
/// queued or running, so two syncs never produce overlapping chains.
pub struct AiChain {
    stages: Vec<Arc<dyn PipelineStage>>,
    current: Mutex<Option<RunningChain>>,
}

impl AiChain {
    pub fn new(stages: Vec<Arc<dyn PipelineStage>>) -> Self {
        Self {
            stages,
            current: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .map(|current| current.as_ref().is_some_and(|c| !c.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Waits for the current chain, if any, to finish.
    pub async fn join(&self) {
        let running = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };
        if let Some(running) = running {
            let _ = running.handle.await;
        }
    }

    pub fn cancel(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(running) = current.take() {
                running.cancel.cancel();
            }
        }
    }
}

impl ChainTrigger for AiChain {
    fn submit(&self, kinds: Vec<AiStageKind>) {
        let ordered: Vec<Arc<dyn PipelineStage>> = AiStageKind::ORDER
            .into_iter()
            .filter(|kind| kinds.contains(kind))
            .filter_map(|kind| self.stages.iter().find(|s| s.kind() == kind).cloned())
            .collect();

        let Ok(mut current) = self.current.lock() else {
            tracing::error!("AI chain state poisoned, dropping submission");
            return;
        };

        if let Some(previous) = current.take() {
            if !previous.handle.is_finished() {
                tracing::info!("Replacing running AI chain");
            }
            previous.cancel.cancel();
        }

        if ordered.is_empty() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_chain(ordered, cancel.clone()));
        *current = Some(RunningChain { cancel, handle });
    }
}

async fn run_chain(stages: Vec<Arc<dyn PipelineStage>>, cancel: CancellationToken) {
    for stage in stages {
        if cancel.is_cancelled() {
            return;
        }

        let kind = stage.kind();
        tracing::debug!("Running AI stage {:?}", kind);
        let result = tokio::select! {
            biased;
            result = stage.run(&cancel) => result,
            _ = cancel.cancelled() => {
                tracing::debug!("AI chain cancelled during {:?}", kind);
                return;
            }
        };

        match result {
            Ok(report) => tracing::info!(
                "AI stage {:?} finished: {} processed, {} failed",
                kind,
                report.processed,
                report.failed
            ),
            Err(e) => {
                // Later stages read what earlier ones write.
                tracing::error!("AI stage {:?} failed, stopping chain: {}", kind, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct RecordingStage {
        kind: AiStageKind,
        delay: Duration,
        events: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl PipelineStage for RecordingStage {
        fn kind(&self) -> AiStageKind {
            self.kind
        }

        async fn run(&self, cancel: &CancellationToken) -> Result<StageReport> {
            let _ = self.events.send(format!("start {:?}", self.kind));
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.events.send(format!("cancelled {:?}", self.kind));
                }
                _ = tokio::time::sleep(self.delay) => {
                    let _ = self.events.send(format!("done {:?}", self.kind));
                }
            }
            Ok(StageReport::default())
        }
    }

    fn stage(
        kind: AiStageKind,
        delay: Duration,
        events: &mpsc::UnboundedSender<String>,
    ) -> Arc<dyn PipelineStage> {
        Arc::new(RecordingStage {
            kind,
            delay,
            events: events.clone(),
        })
    }

    #[test]
    fn enabled_stages_follow_flags_in_order() {
        let features = AiFeatures {
            cleaning: false,
            summarization: true,
            auto_translate: true,
            target_language: None,
        };
        assert_eq!(
            AiStageKind::enabled(&features),
            vec![AiStageKind::Summarization, AiStageKind::Translation]
        );
        assert!(AiStageKind::enabled(&AiFeatures::default()).is_empty());
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chain = AiChain::new(vec![
            stage(AiStageKind::Translation, Duration::ZERO, &tx),
            stage(AiStageKind::Cleaning, Duration::ZERO, &tx),
        ]);

        chain.submit(vec![AiStageKind::Translation, AiStageKind::Cleaning]);
        chain.join().await;
        drop(tx);
        drop(chain);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                "start Cleaning",
                "done Cleaning",
                "start Translation",
                "done Translation"
            ]
        );
    }

    #[tokio::test]
    async fn resubmitting_replaces_running_chain() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chain = AiChain::new(vec![stage(
            AiStageKind::Summarization,
            Duration::from_millis(200),
            &tx,
        )]);

        chain.submit(vec![AiStageKind::Summarization]);
        assert_eq!(rx.recv().await.as_deref(), Some("start Summarization"));
        assert!(chain.is_running());

        chain.submit(vec![AiStageKind::Summarization]);
        let mut handover = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        handover.sort();
        assert_eq!(handover, vec!["cancelled Summarization", "start Summarization"]);
        assert_eq!(rx.recv().await.as_deref(), Some("done Summarization"));

        chain.join().await;
        assert!(!chain.is_running());
    }
}
