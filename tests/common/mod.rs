//! Shared fixtures: a scripted in-process transport and probe operations.

use bytes::Bytes;
use http::{HeaderMap, Response, Uri};
use mirrorstore::{HttpSend, OperationContext, StorageError, StorageOperation, TransportFailure};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted transport outcome.
#[derive(Debug)]
pub enum Reply {
    /// Respond with this status.
    Status(u16),
    /// Fail at the connection level.
    ConnectionError,
    /// Wait, then respond with this status.
    DelayThen(Duration, u16),
}

/// What the transport saw for one dispatched attempt.
#[derive(Debug, Clone)]
pub struct Hit {
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Transport that replays a fixed script and records every request.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    hits: Mutex<Vec<Hit>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            hits: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(statuses: &[u16]) -> Self {
        Self::new(statuses.iter().map(|s| Reply::Status(*s)).collect())
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl HttpSend for ScriptedTransport {
    async fn send(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<Bytes>, TransportFailure> {
        self.hits.lock().unwrap().push(Hit {
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        });
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport script exhausted");
        match reply {
            Reply::Status(status) => Ok(respond(status)),
            Reply::ConnectionError => Err(TransportFailure::connection("scripted refusal")),
            Reply::DelayThen(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(respond(status))
            }
        }
    }
}

fn respond(status: u16) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .header("x-ms-request-id", "srv-0001")
        .body(Bytes::from_static(b"payload"))
        .unwrap()
}

/// Read-only probe: GET the resource, expect 200, return the status.
pub struct FetchAttributes;

impl StorageOperation for FetchAttributes {
    type Output = u16;

    fn build_request(
        &mut self,
        endpoint: &Uri,
        _per_attempt_timeout: Option<Duration>,
        _ctx: &OperationContext,
    ) -> Result<http::Request<Bytes>, StorageError> {
        http::Request::builder()
            .method("GET")
            .uri(format!("{endpoint}container/blob"))
            .body(Bytes::new())
            .map_err(StorageError::build)
    }

    fn parse_response(
        &mut self,
        response: &http::Response<Bytes>,
        _ctx: &OperationContext,
    ) -> Result<u16, StorageError> {
        Ok(response.status().as_u16())
    }
}

/// Probe whose builder always fails; nothing must ever be sent for it.
pub struct BrokenBuilder;

impl StorageOperation for BrokenBuilder {
    type Output = ();

    fn build_request(
        &mut self,
        _endpoint: &Uri,
        _per_attempt_timeout: Option<Duration>,
        _ctx: &OperationContext,
    ) -> Result<http::Request<Bytes>, StorageError> {
        Err(StorageError::build(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "caller supplied an empty blob name",
        )))
    }

    fn parse_response(
        &mut self,
        _response: &http::Response<Bytes>,
        _ctx: &OperationContext,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}
