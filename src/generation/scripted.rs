use crate::generation::{GenEvent, GenFailure, GenStream, GenerationRequest, Generator};
use futures::StreamExt;
use std::time::Duration;

/// Deterministic generator driven by a fixed step list. Backs tests
/// and the keyless demo mode, where it narrates placeholder copy for
/// whatever prompt it is given.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(String),
    ArtifactEnd,
    Delay(Duration),
    Fail { message: String, transient: bool },
    /// Emit nothing and never end; exercises watchdog and stall paths.
    Hang,
}

pub struct ScriptedGenerator {
    steps: Vec<ScriptStep>,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    /// Demo script: a short multi-chunk draft ending in one complete
    /// artifact, so the pipeline is fully exercised without an
    /// upstream key.
    pub fn placeholder() -> Self {
        Self::new(vec![
            ScriptStep::Chunk("# Draft\n\n".to_string()),
            ScriptStep::Delay(Duration::from_millis(50)),
            ScriptStep::Chunk("This is locally generated placeholder copy. ".to_string()),
            ScriptStep::Delay(Duration::from_millis(50)),
            ScriptStep::Chunk("Configure an upstream provider for real output.\n".to_string()),
            ScriptStep::ArtifactEnd,
        ])
    }

    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<ScriptStep> = chunks
            .into_iter()
            .map(|c| ScriptStep::Chunk(c.into()))
            .collect();
        steps.push(ScriptStep::ArtifactEnd);
        Self::new(steps)
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, _request: &GenerationRequest) -> GenStream {
        let steps = self.steps.clone();
        futures::stream::iter(steps)
            .filter_map(|step| async move {
                match step {
                    ScriptStep::Chunk(text) => Some(Ok(GenEvent::Delta(text))),
                    ScriptStep::ArtifactEnd => Some(Ok(GenEvent::ArtifactEnd)),
                    ScriptStep::Delay(duration) => {
                        tokio::time::sleep(duration).await;
                        None
                    }
                    ScriptStep::Fail { message, transient } => {
                        Some(Err(GenFailure { message, transient }))
                    }
                    ScriptStep::Hang => {
                        futures::future::pending::<()>().await;
                        None
                    }
                }
            })
            .boxed()
    }
}
