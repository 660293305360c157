//! Signed REST dispatch.
//!
//! Every private call flows through the same pipeline: encode params in
//! the order they are sent, reserve budget, sign, dispatch, commit the
//! reservation. Acks are surfaced as typed records for the lifecycle
//! tracker; full endpoint payload schemas stay with the caller.

use crate::cost::Endpoint;
use crate::error::{RestError, RestResult};
use crate::limiter::{RateLimiter, ReservePolicy};
use krf_auth::Signer;
use krf_core::{ClientOrderId, OrderId, OrderSide, OrderType, Qty, Symbol};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    /// REST base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Reservation policy for order-management calls.
    pub order_policy: ReservePolicy,
    /// Reservation policy for best-effort polling calls.
    pub poll_policy: ReservePolicy,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://futures.kraken.com".to_string(),
            timeout: Duration::from_secs(10),
            order_policy: ReservePolicy::Block,
            poll_policy: ReservePolicy::FailFast,
        }
    }
}

/// Ack outcome of an order-management call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Placed,
    Edited,
    Cancelled,
    Rejected(String),
}

/// Typed order acknowledgement extracted from a REST response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: Option<OrderId>,
    pub client_order_id: Option<ClientOrderId>,
    pub status: AckStatus,
}

/// One entry of a batch-order response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub order_tag: Option<String>,
    pub ack: OrderAck,
}

/// Batch-order acknowledgement, one item per submitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAck {
    pub items: Vec<BatchItem>,
}

/// Cancel-all acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAllAck {
    pub cancelled: Vec<OrderId>,
}

/// Parameters for a new order.
#[derive(Debug, Clone)]
pub struct SendOrderParams {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: Qty,
    pub client_order_id: Option<ClientOrderId>,
}

impl SendOrderParams {
    /// Encode as `key=value` pairs in wire order.
    ///
    /// Type-specific parameters dispatch on the order-type variant.
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("orderType", self.order_type.wire_code().to_string()),
            ("symbol", self.symbol.as_str().to_string()),
            ("side", self.side.to_string()),
            ("size", self.size.to_string()),
        ];
        match &self.order_type {
            OrderType::Limit { limit_price } => {
                params.push(("limitPrice", limit_price.to_string()));
            }
            OrderType::Market => {}
            OrderType::Stop {
                stop_price,
                limit_price,
            } => {
                params.push(("stopPrice", stop_price.to_string()));
                if let Some(limit) = limit_price {
                    params.push(("limitPrice", limit.to_string()));
                }
            }
            OrderType::TakeProfit { trigger_price } => {
                params.push(("stopPrice", trigger_price.to_string()));
                params.push(("triggerSignal", "mark".to_string()));
            }
            OrderType::TrailingStop { max_deviation } => {
                params.push(("trailingStopMaxDeviation", max_deviation.to_string()));
                params.push(("trailingStopDeviationUnit", "PERCENT".to_string()));
            }
        }
        if let Some(cloid) = &self.client_order_id {
            params.push(("cliOrdId", cloid.as_str().to_string()));
        }
        params
    }
}

/// Concatenate parameters as `key=value&...` in the order given.
fn encode_params(params: &[(&'static str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Signed, budget-gated REST client.
pub struct RestClient {
    http: reqwest::Client,
    config: RestClientConfig,
    signer: Arc<Signer>,
    limiter: RateLimiter,
}

impl RestClient {
    /// Build a client. The limiter is injected so all callers in the
    /// process share the same budgets.
    pub fn new(
        config: RestClientConfig,
        signer: Arc<Signer>,
        limiter: RateLimiter,
    ) -> RestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            signer,
            limiter,
        })
    }

    /// Submit a single order.
    pub async fn send_order(&self, order: &SendOrderParams) -> RestResult<OrderAck> {
        let response = self
            .dispatch(
                Endpoint::SendOrder,
                order.to_params(),
                self.config.order_policy,
            )
            .await?;
        parse_order_ack(&response, "sendStatus")
    }

    /// Edit quantity and/or limit price of a resting order.
    pub async fn edit_order(
        &self,
        order_id: &OrderId,
        size: Option<Qty>,
        limit_price: Option<krf_core::Price>,
    ) -> RestResult<OrderAck> {
        let mut params = vec![("orderId", order_id.as_str().to_string())];
        if let Some(size) = size {
            params.push(("size", size.to_string()));
        }
        if let Some(price) = limit_price {
            params.push(("limitPrice", price.to_string()));
        }
        let response = self
            .dispatch(Endpoint::EditOrder, params, self.config.order_policy)
            .await?;
        parse_order_ack(&response, "editStatus")
    }

    /// Cancel a single order by exchange id or client id.
    pub async fn cancel_order(
        &self,
        order_id: Option<&OrderId>,
        client_order_id: Option<&ClientOrderId>,
    ) -> RestResult<OrderAck> {
        let mut params = Vec::new();
        if let Some(id) = order_id {
            params.push(("order_id", id.as_str().to_string()));
        }
        if let Some(cloid) = client_order_id {
            params.push(("cliOrdId", cloid.as_str().to_string()));
        }
        let response = self
            .dispatch(Endpoint::CancelOrder, params, self.config.order_policy)
            .await?;
        parse_order_ack(&response, "cancelStatus")
    }

    /// Submit a batch of orders in one call.
    ///
    /// The response is unrolled into one ack per order so the tracker
    /// applies the same per-order rules as for a single submission.
    pub async fn batch_order(&self, orders: &[SendOrderParams]) -> RestResult<BatchAck> {
        let elements: Vec<Value> = orders
            .iter()
            .enumerate()
            .map(|(i, order)| {
                let mut element = serde_json::Map::new();
                element.insert("order".into(), Value::String("send".into()));
                element.insert("order_tag".into(), Value::String((i + 1).to_string()));
                for (k, v) in order.to_params() {
                    element.insert(k.to_string(), Value::String(v));
                }
                Value::Object(element)
            })
            .collect();
        let batch = serde_json::to_string(&serde_json::json!({ "batchOrder": elements }))?;

        let endpoint = Endpoint::BatchOrder {
            count: orders.len() as u32,
        };
        let response = self
            .dispatch(endpoint, vec![("json", batch)], self.config.order_policy)
            .await?;
        parse_batch_ack(&response)
    }

    /// Cancel all open orders, optionally for one symbol.
    pub async fn cancel_all_orders(&self, symbol: Option<&Symbol>) -> RestResult<CancelAllAck> {
        let mut params = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", symbol.as_str().to_string()));
        }
        let response = self
            .dispatch(
                Endpoint::CancelAllOrders,
                params,
                self.config.order_policy,
            )
            .await?;
        Ok(parse_cancel_all(&response))
    }

    /// Account balances and margin. Best-effort polling call.
    pub async fn accounts(&self) -> RestResult<Value> {
        self.dispatch(Endpoint::Accounts, Vec::new(), self.config.poll_policy)
            .await
    }

    /// Currently open positions.
    pub async fn open_positions(&self) -> RestResult<Value> {
        self.dispatch(
            Endpoint::OpenPositions,
            Vec::new(),
            self.config.poll_policy,
        )
        .await
    }

    /// Currently open orders.
    pub async fn open_orders(&self) -> RestResult<Value> {
        self.dispatch(Endpoint::OpenOrders, Vec::new(), self.config.poll_policy)
            .await
    }

    /// Recent fills, optionally bounded by `lastFillTime`.
    pub async fn fills(&self, last_fill_time: Option<&str>) -> RestResult<Value> {
        let mut params = Vec::new();
        if let Some(t) = last_fill_time {
            params.push(("lastFillTime", t.to_string()));
        }
        let endpoint = Endpoint::Fills {
            with_last_fill_time: last_fill_time.is_some(),
        };
        self.dispatch(endpoint, params, self.config.poll_policy)
            .await
    }

    /// Historical orders page. Draws from the history pool.
    pub async fn history_orders(&self, since: Option<&str>) -> RestResult<Value> {
        let mut params = Vec::new();
        if let Some(since) = since {
            params.push(("since", since.to_string()));
        }
        self.dispatch_get(Endpoint::HistoryOrders, params, self.config.poll_policy)
            .await
    }

    /// Historical executions page. Draws from the history pool.
    pub async fn history_executions(&self, since: Option<&str>) -> RestResult<Value> {
        let mut params = Vec::new();
        if let Some(since) = since {
            params.push(("since", since.to_string()));
        }
        self.dispatch_get(
            Endpoint::HistoryExecutions,
            params,
            self.config.poll_policy,
        )
        .await
    }

    /// Account log page; cost tier scales with `count`.
    pub async fn account_log(&self, count: u32) -> RestResult<Value> {
        self.dispatch_get(
            Endpoint::AccountLog { count },
            vec![("count", count.to_string())],
            self.config.poll_policy,
        )
        .await
    }

    /// Sign, reserve and dispatch one call.
    async fn dispatch(
        &self,
        endpoint: Endpoint,
        params: Vec<(&'static str, String)>,
        policy: ReservePolicy,
    ) -> RestResult<Value> {
        let post_data = encode_params(&params);
        let reservation = self
            .limiter
            .reserve_with_policy(endpoint.pool(), endpoint.cost(), policy)
            .await?;

        let headers = self.signer.auth_headers(&post_data, endpoint.path());
        let url = format!("{}{}", self.config.base_url, endpoint.path());
        debug!(path = endpoint.path(), cost = endpoint.cost(), "REST dispatch");

        let request = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .header("APIKey", &headers.api_key)
            .header("Authent", &headers.authent)
            .header("Nonce", &headers.nonce)
            .body(post_data);

        // The call leaves the process now; the budget stays charged.
        reservation.commit();

        let response = request.send().await?;
        let body: Value = response.json().await?;

        check_api_error(&endpoint, body)
    }

    /// GET variant for history endpoints; the query string is what
    /// gets signed.
    async fn dispatch_get(
        &self,
        endpoint: Endpoint,
        params: Vec<(&'static str, String)>,
        policy: ReservePolicy,
    ) -> RestResult<Value> {
        let query = encode_params(&params);
        let reservation = self
            .limiter
            .reserve_with_policy(endpoint.pool(), endpoint.cost(), policy)
            .await?;

        let headers = self.signer.auth_headers(&query, endpoint.path());
        let mut url = format!("{}{}", self.config.base_url, endpoint.path());
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        debug!(path = endpoint.path(), cost = endpoint.cost(), "REST dispatch");

        let request = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("APIKey", &headers.api_key)
            .header("Authent", &headers.authent)
            .header("Nonce", &headers.nonce);

        reservation.commit();

        let response = request.send().await?;
        let body: Value = response.json().await?;
        check_api_error(&endpoint, body)
    }
}

fn check_api_error(endpoint: &Endpoint, body: Value) -> RestResult<Value> {
    if body.get("result").and_then(Value::as_str) == Some("error") {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        warn!(path = endpoint.path(), %message, "API error response");
        return Err(RestError::Api(message));
    }
    Ok(body)
}

/// Extract a typed ack from a `sendStatus`/`editStatus`/`cancelStatus`
/// envelope.
fn parse_order_ack(response: &Value, status_key: &str) -> RestResult<OrderAck> {
    let status_obj = response
        .get(status_key)
        .ok_or_else(|| RestError::Api(format!("missing {status_key}")))?;
    Ok(order_ack_from_status(status_obj))
}

fn order_ack_from_status(status_obj: &Value) -> OrderAck {
    let order_id = status_obj
        .get("order_id")
        .or_else(|| status_obj.get("orderId"))
        .and_then(Value::as_str)
        .map(|s| OrderId::new(s.to_string()));
    let client_order_id = status_obj
        .get("cliOrdId")
        .and_then(Value::as_str)
        .map(|s| ClientOrderId::from_string(s.to_string()));
    let status = match status_obj.get("status").and_then(Value::as_str) {
        Some("placed") => AckStatus::Placed,
        Some("edited") => AckStatus::Edited,
        Some("cancelled") => AckStatus::Cancelled,
        Some(other) => AckStatus::Rejected(other.to_string()),
        None => AckStatus::Rejected("missing status".to_string()),
    };
    OrderAck {
        order_id,
        client_order_id,
        status,
    }
}

fn parse_batch_ack(response: &Value) -> RestResult<BatchAck> {
    let statuses = response
        .get("batchStatus")
        .and_then(Value::as_array)
        .ok_or_else(|| RestError::Api("missing batchStatus".to_string()))?;

    let items = statuses
        .iter()
        .map(|status_obj| BatchItem {
            order_tag: status_obj
                .get("order_tag")
                .and_then(Value::as_str)
                .map(str::to_string),
            ack: order_ack_from_status(status_obj),
        })
        .collect();
    Ok(BatchAck { items })
}

fn parse_cancel_all(response: &Value) -> CancelAllAck {
    let cancelled = response
        .get("cancelStatus")
        .and_then(|s| s.get("cancelledOrders"))
        .and_then(Value::as_array)
        .map(|orders| {
            orders
                .iter()
                .filter_map(|o| o.get("order_id").and_then(Value::as_str))
                .map(|s| OrderId::new(s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    CancelAllAck { cancelled }
}
