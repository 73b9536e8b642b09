//! Adapter interfaces for the external captioning and refinement backends.
//!
//! The batch processor only sees the [`Captioner`] and [`Refiner`] traits;
//! the HTTP clients behind them live in the submodules.

pub mod gradio;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Role;

pub use gradio::GradioCaptioner;
pub use openai::{OpenAiRefiner, RateLimitPolicy};

/// Errors returned by a backend call. None of these abort a batch.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend}: request failed: {source}")]
    Transport {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{backend}: server returned {status}: {body}")]
    Status {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend}: unexpected response: {message}")]
    Protocol {
        backend: &'static str,
        message: String,
    },

    #[error("{backend}: remote error: {message}")]
    Remote {
        backend: &'static str,
        message: String,
    },

    #[error("{backend}: still rate limited after {attempts} attempts")]
    RateLimited { backend: &'static str, attempts: u32 },

    #[error("{backend}: empty response")]
    Empty { backend: &'static str },
}

impl BackendError {
    pub(crate) fn transport(backend: &'static str, source: reqwest::Error) -> Self {
        Self::Transport { backend, source }
    }

    pub(crate) fn protocol(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            backend,
            message: message.into(),
        }
    }

    /// True for client-side timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { source, .. } if source.is_timeout())
    }
}

/// Turns an image into free text
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Caption one image. `file_name` is a hint for the backend and for logs.
    async fn caption(&self, image: Vec<u8>, file_name: &str) -> Result<String, BackendError>;
}

/// Rewrites a caption so it carries the trigger word
#[async_trait]
pub trait Refiner: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    async fn refine(
        &self,
        trigger_word: &str,
        raw_caption: &str,
        role: Role,
    ) -> Result<String, BackendError>;
}
