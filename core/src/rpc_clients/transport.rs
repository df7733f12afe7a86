use std::task;

use alloy::{
    rpc::json_rpc::{RequestPacket, ResponsePacket},
    transports::{
        TransportError, TransportErrorKind, TransportFut, TransportResult, http::reqwest,
    },
};
use tower::Service;
use tracing::{Instrument, debug, debug_span, trace};

/// HTTP transport over a shared reqwest client that adds fixed headers to every request.
///
/// Bundler and paymaster services usually authenticate through headers, while the
/// connection pool is shared across every client of a chain.
#[derive(Clone, Debug)]
pub struct HeaderTransport {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: reqwest::header::HeaderMap,
}

impl HeaderTransport {
    pub fn new(
        client: reqwest::Client,
        url: reqwest::Url,
        headers: reqwest::header::HeaderMap,
    ) -> Self {
        Self {
            client,
            url,
            headers,
        }
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    async fn send(self, req: RequestPacket) -> TransportResult<ResponsePacket> {
        let resp = self
            .client
            .post(self.url)
            .headers(self.headers)
            .json(&req)
            .send()
            .await
            .map_err(TransportErrorKind::custom)?;

        let status = resp.status();
        debug!(?status, "received response");

        let body = resp.bytes().await.map_err(TransportErrorKind::custom)?;
        trace!(body = %String::from_utf8_lossy(&body), "response body");

        if !status.is_success() {
            return Err(TransportErrorKind::http_error(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        serde_json::from_slice(&body)
            .map_err(|err| TransportError::deser_err(err, String::from_utf8_lossy(&body)))
    }
}

impl Service<RequestPacket> for HeaderTransport {
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    #[inline]
    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Self::Error>> {
        task::Poll::Ready(Ok(()))
    }

    #[inline]
    fn call(&mut self, req: RequestPacket) -> Self::Future {
        let this = self.clone();
        let span = debug_span!("rpc_transport", url = %this.url);
        Box::pin(this.send(req).instrument(span))
    }
}

/// Hands out [`HeaderTransport`]s that all share one connection pool
#[derive(Clone, Debug)]
pub struct SharedTransportBuilder {
    client: reqwest::Client,
}

impl SharedTransportBuilder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn with_headers(
        &self,
        url: reqwest::Url,
        headers: reqwest::header::HeaderMap,
    ) -> HeaderTransport {
        HeaderTransport::new(self.client.clone(), url, headers)
    }

    pub fn plain(&self, url: reqwest::Url) -> HeaderTransport {
        self.with_headers(url, reqwest::header::HeaderMap::new())
    }
}
