//! Builders for combo (multi-request) and single-request calls.

use crate::client::{BroadcastResult, Client};
use crate::error::ClientError;
use comborpc_protocol::{Request, RequestBatch, Response};
use serde::Serialize;

/// A batch of requests sent together in one frame.
///
/// ```no_run
/// # async fn demo(client: &comborpc_client::Client) -> Result<(), comborpc_client::ClientError> {
/// let responses = client
///     .combo()
///     .header("tenant", "acme")
///     .add_text_request("user.get", "42")
///     .add_json_request("order.list", &[1, 2, 3])?
///     .call()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ComboCall<'a> {
    client: &'a Client,
    batch: RequestBatch,
}

impl<'a> ComboCall<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            batch: RequestBatch::default(),
        }
    }

    pub fn add_request(mut self, request: Request) -> Self {
        self.batch.push(request);
        self
    }

    pub fn add_requests(mut self, requests: impl IntoIterator<Item = Request>) -> Self {
        self.batch.requests.extend(requests);
        self
    }

    pub fn add_text_request(self, method: impl Into<String>, data: impl Into<String>) -> Self {
        self.add_request(Request::text(method, data))
    }

    pub fn add_json_request<T: Serialize>(
        self,
        method: impl Into<String>,
        value: &T,
    ) -> Result<Self, ClientError> {
        Ok(self.add_request(Request::json(method, value)?))
    }

    pub fn add_yaml_request<T: Serialize>(
        self,
        method: impl Into<String>,
        value: &T,
    ) -> Result<Self, ClientError> {
        Ok(self.add_request(Request::yaml(method, value)?))
    }

    pub fn add_xml_request<T: Serialize>(
        self,
        method: impl Into<String>,
        value: &T,
    ) -> Result<Self, ClientError> {
        Ok(self.add_request(Request::xml(method, value)?))
    }

    /// Attaches a batch-level header, visible to every item's handler.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.batch = self.batch.with_header(key, value);
        self
    }

    pub fn batch(&self) -> &RequestBatch {
        &self.batch
    }

    pub async fn call(&self) -> Result<Vec<Response>, ClientError> {
        self.client.call(&self.batch).await
    }

    pub async fn broadcast(&self) -> Result<Vec<BroadcastResult>, ClientError> {
        self.client.broadcast(&self.batch).await
    }
}

/// A call carrying exactly one request. Setting the request again replaces it.
#[derive(Debug)]
pub struct SingleCall<'a> {
    client: &'a Client,
    request: Option<Request>,
    headers: Vec<(String, String)>,
}

impl<'a> SingleCall<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            request: None,
            headers: Vec::new(),
        }
    }

    pub fn set_request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn set_text_request(self, method: impl Into<String>, data: impl Into<String>) -> Self {
        self.set_request(Request::text(method, data))
    }

    pub fn set_json_request<T: Serialize>(
        self,
        method: impl Into<String>,
        value: &T,
    ) -> Result<Self, ClientError> {
        Ok(self.set_request(Request::json(method, value)?))
    }

    pub fn set_yaml_request<T: Serialize>(
        self,
        method: impl Into<String>,
        value: &T,
    ) -> Result<Self, ClientError> {
        Ok(self.set_request(Request::yaml(method, value)?))
    }

    pub fn set_xml_request<T: Serialize>(
        self,
        method: impl Into<String>,
        value: &T,
    ) -> Result<Self, ClientError> {
        Ok(self.set_request(Request::xml(method, value)?))
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    fn batch(&self) -> RequestBatch {
        let requests = self.request.iter().cloned().collect();
        self.headers
            .iter()
            .fold(RequestBatch::new(requests), |batch, (k, v)| {
                batch.with_header(k.clone(), v.clone())
            })
    }

    pub async fn call(&self) -> Result<Response, ClientError> {
        let mut responses = self.client.call(&self.batch()).await?;
        responses.pop().ok_or_else(|| {
            ClientError::Protocol(comborpc_protocol::ProtocolError::BatchMismatch {
                expected: 1,
                actual: 0,
            })
        })
    }

    pub async fn broadcast(&self) -> Result<Vec<BroadcastResult>, ClientError> {
        self.client.broadcast(&self.batch()).await
    }
}
