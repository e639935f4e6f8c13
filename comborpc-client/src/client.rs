//! Client dispatcher: single-target calls and broadcast.

use crate::balance::{LoadBalance, RandomBalance};
use crate::call::{ComboCall, SingleCall};
use crate::error::ClientError;
use bytes::Bytes;
use comborpc_protocol::{
    normalize_timeout, Connection, ProtocolError, Request, RequestBatch, Response, WireFormat,
    DEFAULT_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoints, `host:port`.
    pub endpoints: Vec<String>,
    /// Deadline for one dial-and-exchange cycle.
    pub timeout: Duration,
    /// Body codec and compression; must match the server.
    pub wire: WireFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            wire: WireFormat::default(),
        }
    }
}

impl ClientConfig {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Sets the call deadline. Values below 1ms fall back to the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = normalize_timeout(timeout);
        self
    }

    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }
}

/// Outcome of a broadcast against one endpoint.
#[derive(Debug)]
pub struct BroadcastResult {
    pub endpoint: String,
    pub outcome: Result<Vec<Response>, ClientError>,
}

impl BroadcastResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn responses(&self) -> Option<&[Response]> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.outcome.as_ref().err()
    }
}

/// Client for one set of comborpc endpoints.
///
/// Each call opens a fresh connection, performs exactly one exchange and closes it.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    balance: Arc<dyn LoadBalance>,
}

impl Client {
    /// Creates a client that picks endpoints uniformly at random.
    pub fn new(config: ClientConfig) -> Self {
        let config = ClientConfig {
            timeout: normalize_timeout(config.timeout),
            ..config
        };
        Self {
            config,
            balance: Arc::new(RandomBalance),
        }
    }

    /// Replaces the endpoint selection strategy.
    pub fn with_load_balance(mut self, balance: impl LoadBalance + 'static) -> Self {
        self.balance = Arc::new(balance);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &[String] {
        &self.config.endpoints
    }

    /// Starts a multi-request call.
    pub fn combo(&self) -> ComboCall<'_> {
        ComboCall::new(self)
    }

    /// Starts a one-request call.
    pub fn single(&self) -> SingleCall<'_> {
        SingleCall::new(self)
    }

    /// Sends `batch` to one endpoint and returns the index-aligned responses.
    pub async fn call(&self, batch: &RequestBatch) -> Result<Vec<Response>, ClientError> {
        self.validate(batch)?;
        let endpoint = self
            .balance
            .pick(&self.config.endpoints)
            .ok_or_else(|| ClientError::validation("load balancer selected no endpoint"))?;

        let body = self.config.wire.encode(batch)?;
        tracing::debug!("Calling {} with {} request(s)", endpoint, batch.len());
        exchange(endpoint, self.config.timeout, self.config.wire, body, batch.len()).await
    }

    /// Sends a single request and returns its response.
    pub async fn call_one(&self, request: Request) -> Result<Response, ClientError> {
        let batch = RequestBatch::new(vec![request]);
        let mut responses = self.call(&batch).await?;
        responses.pop().ok_or(ClientError::Protocol(ProtocolError::BatchMismatch {
            expected: 1,
            actual: 0,
        }))
    }

    /// Sends `batch` to every endpoint concurrently.
    ///
    /// Returns one result per endpoint in configured order. Failures are recorded per
    /// endpoint; only validation failures fail the whole call.
    pub async fn broadcast(
        &self,
        batch: &RequestBatch,
    ) -> Result<Vec<BroadcastResult>, ClientError> {
        self.validate(batch)?;
        let body = self.config.wire.encode(batch)?;
        tracing::debug!(
            "Broadcasting {} request(s) to {} endpoint(s)",
            batch.len(),
            self.config.endpoints.len()
        );

        let tasks: Vec<_> = self
            .config
            .endpoints
            .iter()
            .map(|endpoint| {
                let endpoint = endpoint.clone();
                let body = body.clone();
                let timeout = self.config.timeout;
                let wire = self.config.wire;
                let expected = batch.len();
                tokio::spawn(
                    async move { exchange(&endpoint, timeout, wire, body, expected).await },
                )
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (endpoint, task) in self.config.endpoints.iter().zip(tasks) {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ClientError::Task(e.to_string())),
            };
            if let Err(ref e) = outcome {
                tracing::debug!("Broadcast to {} failed: {}", endpoint, e);
            }
            results.push(BroadcastResult {
                endpoint: endpoint.clone(),
                outcome,
            });
        }
        Ok(results)
    }

    fn validate(&self, batch: &RequestBatch) -> Result<(), ClientError> {
        if batch.is_empty() {
            return Err(ClientError::validation("request batch is empty"));
        }
        if self.config.endpoints.is_empty() {
            return Err(ClientError::validation("endpoint list is empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("config", &self.config).finish()
    }
}

/// Dials `endpoint`, sends one frame, reads one frame and closes the connection.
async fn exchange(
    endpoint: &str,
    timeout: Duration,
    wire: WireFormat,
    body: Bytes,
    expected: usize,
) -> Result<Vec<Response>, ClientError> {
    let mut conn = Connection::connect(endpoint, timeout).await?;
    let result = roundtrip(&mut conn, wire, &body, expected).await;
    conn.close().await;
    result.map_err(ClientError::from)
}

async fn roundtrip(
    conn: &mut Connection,
    wire: WireFormat,
    body: &[u8],
    expected: usize,
) -> Result<Vec<Response>, ProtocolError> {
    conn.send(body).await?;
    let reply = conn.receive().await?;
    let responses: Vec<Response> = wire.decode(&reply)?;
    if responses.len() != expected {
        return Err(ProtocolError::BatchMismatch {
            expected,
            actual: responses.len(),
        });
    }
    Ok(responses)
}
