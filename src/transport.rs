//! Transport collaborator seam.
//!
//! The engine does not implement HTTP. It hands each fully built and signed
//! attempt to an [`HttpSend`] implementation and classifies whatever comes
//! back. Anything that produces an `http::Response` counts as a response,
//! success or not; only connection-level trouble surfaces as a
//! [`TransportFailure`].

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Connection-level failure of one physical attempt.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The connection could not be established or broke mid-exchange.
    #[error("connection failed: {message}")]
    Connection {
        /// Transport-supplied description.
        message: String,
        /// Underlying cause, when the transport exposes one.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The per-attempt timeout elapsed before a response arrived.
    #[error("attempt timed out after {elapsed:?}")]
    TimedOut {
        /// Time spent waiting on this attempt.
        elapsed: Duration,
    },

    /// The caller canceled the operation mid-flight.
    #[error("operation canceled")]
    Canceled,
}

impl TransportFailure {
    /// Connection failure with only a description.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Connection failure wrapping an underlying error.
    pub fn connection_caused_by(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a retry policy may consider another attempt. Cancellation is
    /// terminal; the engine must not race a canceled caller.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Canceled)
    }
}

/// Dispatches one physical HTTP attempt.
///
/// Implementations are shared across concurrent logical operations and must
/// be safe for unsynchronized concurrent calls.
#[async_trait::async_trait]
pub trait HttpSend: Send + Sync + std::fmt::Debug {
    /// Send the request and return the service's response.
    async fn send(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<Bytes>, TransportFailure>;
}

#[async_trait::async_trait]
impl<T: HttpSend + ?Sized> HttpSend for std::sync::Arc<T> {
    async fn send(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<Bytes>, TransportFailure> {
        (**self).send(request).await
    }
}
