//! HTTP implementation of [`AccrualSource`].
//!
//! Wire contract: `GET {base}/api/orders/{number}` returns
//! `{"order": string, "status": string, "accrual"?: number}`. 429 and 204
//! map to [`AccrualCheck::NotReady`]; any other 2xx is decoded as a
//! definitive reply; everything else is an error the worker absorbs as
//! transient.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use tally_domain::points::centi_from_wire;

use crate::{AccrualCheck, AccrualError, AccrualReply, AccrualSource, AccrualStatus};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualClient {
    /// Build a client with the default request timeout. The base URL is
    /// constructor input so tests can point it at a local mock server.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AccrualError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccrualError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn order_url(&self, number: &str) -> String {
        format!(
            "{}/api/orders/{}",
            self.base_url.trim_end_matches('/'),
            number
        )
    }
}

#[async_trait]
impl AccrualSource for AccrualClient {
    async fn check(&self, order_number: &str) -> Result<AccrualCheck, AccrualError> {
        let resp = self
            .http
            .get(self.order_url(order_number))
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Ok(AccrualCheck::NotReady);
        }
        if !status.is_success() {
            return Err(AccrualError::UnexpectedStatus(status.as_u16()));
        }

        let wire: WireReply = resp
            .json()
            .await
            .map_err(|e| AccrualError::Decode(e.to_string()))?;
        reply_from_wire(wire).map(AccrualCheck::Ready)
    }
}

#[derive(Debug, Deserialize)]
struct WireReply {
    order: String,
    status: String,
    accrual: Option<f64>,
}

fn reply_from_wire(wire: WireReply) -> Result<AccrualReply, AccrualError> {
    let status = AccrualStatus::parse(&wire.status)?;
    let accrual_centi = match wire.accrual {
        Some(value) => Some(centi_from_wire(value).map_err(|e| AccrualError::Decode(e.to_string()))?),
        None => None,
    };
    Ok(AccrualReply {
        order: wire.order,
        status,
        accrual_centi,
    })
}

// ---------------------------------------------------------------------------
// Tests (local mock server, no real network)
// ---------------------------------------------------------------------------
