//! Provider double for gateway and route tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{GenerationProvider, ProviderCall, ProviderError, ProviderOutput};

/// Returns the same scripted outcome for every call, optionally after a delay
pub struct ScriptedProvider {
    outcome: Result<ProviderOutput, ProviderError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn returning(output: ProviderOutput) -> Self {
        Self {
            outcome: Ok(output),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn image() -> Self {
        Self::returning(ProviderOutput::Binary {
            mime_type: "image/png".to_string(),
            data: b"png-bytes".to_vec(),
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn generate(&self, _call: &ProviderCall) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}
