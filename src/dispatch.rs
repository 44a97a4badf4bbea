//! Dispatcher - shapes an event and delivers the rows to the bulker gateway.
//!
//! # Flow
//!
//! ```text
//! AnalyticsEvent
//!     │
//!     ▼  repair GA4 client ids
//!     ▼  DataLayout::layout
//! [MappedEvent, MappedEvent?]
//!     │
//!     ▼  one POST per row, in order
//! POST {endpoint}/post/{destinationId}?tableName={table}
//!     Authorization: Bearer {authToken}
//!     metricsMeta: {"workspaceId":..,"streamId":..,"destinationId":..,"connectionId":..,"functionId":..}
//! ```
//!
//! # Failure Semantics
//!
//! The first failed row stops the invocation; later rows are not attempted
//! and earlier rows stay delivered. Every failure, transport or HTTP status,
//! surfaces as a single [`DispatchError::Retryable`]. The caller re-runs the
//! whole event on retry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::event::AnalyticsEvent;
use crate::layouts::{DataLayout, MappedEvent};
use crate::transport::{DeliveryError, DeliveryRequest, DeliveryResponse, Transport};

/// Function identifier reported in the metrics metadata
pub const FUNCTION_ID: &str = "builtin.destination.bulker";

/// Errors surfaced by [`Dispatcher::dispatch`].
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A delivery failed; the caller should redeliver the whole event later
    #[error("delivery failed, event should be retried: {0}")]
    Retryable(#[source] DeliveryError),
}

impl DispatchError {
    /// Always true: every dispatch failure is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Retryable(_))
    }

    /// Gateway HTTP status, when the failure was a non-success response
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Retryable(DeliveryError::Status { status, .. }) => Some(*status),
            DispatchError::Retryable(_) => None,
        }
    }
}

/// Where and how rows are delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationConfig {
    /// Bulker base URL, e.g. "http://bulker:3042"
    pub endpoint: String,
    pub destination_id: String,
    pub auth_token: String,
    pub data_layout: DataLayout,
}

/// Identifiers of the pipeline invoking the dispatcher, used for metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvocationContext {
    #[serde(default)]
    pub workspace_id: String,
    /// Source the event came from
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub destination_id: String,
    #[serde(default)]
    pub connection_id: String,
}

/// Metadata attached to every delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsMeta<'a> {
    pub workspace_id: &'a str,
    pub stream_id: &'a str,
    pub destination_id: &'a str,
    pub connection_id: &'a str,
    pub function_id: &'a str,
}

impl<'a> MetricsMeta<'a> {
    pub fn new(ctx: &'a InvocationContext) -> Self {
        Self {
            workspace_id: &ctx.workspace_id,
            stream_id: &ctx.stream_id,
            destination_id: &ctx.destination_id,
            connection_id: &ctx.connection_id,
            function_id: FUNCTION_ID,
        }
    }
}

/// Build `{endpoint}/post/{destination_id}?tableName={table}`.
///
/// The table name is query-encoded but otherwise sent as-is; sanitizing it
/// into a valid identifier is up to the gateway.
pub fn delivery_url(endpoint: &str, destination_id: &str, table: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/post/{}",
        endpoint.trim_end_matches('/'),
        destination_id
    ))?;
    url.query_pairs_mut().append_pair("tableName", table);
    Ok(url.into())
}

/// Delivers events to one bulker destination.
///
/// Holds no per-event state; one dispatcher can serve concurrent invocations.
#[derive(Clone)]
pub struct Dispatcher {
    config: DestinationConfig,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(config: DestinationConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &DestinationConfig {
        &self.config
    }

    /// Shape `event` with the configured layout and deliver every row.
    ///
    /// Returns the original, untransformed event once all rows are accepted.
    pub async fn dispatch(
        &self,
        event: AnalyticsEvent,
        ctx: &InvocationContext,
    ) -> Result<AnalyticsEvent, DispatchError> {
        let metrics_meta = serde_json::to_string(&MetricsMeta::new(ctx))
            .map_err(|e| DispatchError::Retryable(e.into()))?;

        let mapped = {
            let adjusted = event.repair_client_ids();
            self.config.data_layout.layout(&adjusted)
        };

        debug!(
            destination_id = %self.config.destination_id,
            layout = %self.config.data_layout,
            transport = self.transport.name(),
            event_type = ?event.kind(),
            rows = mapped.len(),
            "Dispatching event"
        );

        for (index, row) in mapped.iter().enumerate() {
            if let Err(e) = self.deliver(row, &metrics_meta).await {
                warn!(
                    destination_id = %self.config.destination_id,
                    table = %row.table,
                    row = index,
                    delivered = index,
                    remaining = mapped.len() - index - 1,
                    error = %e,
                    "Delivery failed, aborting event"
                );
                return Err(DispatchError::Retryable(e));
            }
        }

        info!(
            destination_id = %self.config.destination_id,
            rows = mapped.len(),
            "Event delivered"
        );
        Ok(event)
    }

    /// One POST for one row.
    async fn deliver(
        &self,
        row: &MappedEvent,
        metrics_meta: &str,
    ) -> Result<DeliveryResponse, DeliveryError> {
        let request = DeliveryRequest {
            url: delivery_url(
                &self.config.endpoint,
                &self.config.destination_id,
                &row.table,
            )?,
            auth_token: self.config.auth_token.clone(),
            metrics_meta: metrics_meta.to_string(),
            body: serde_json::to_string(&row.record)?,
        };

        let response = self.transport.post(&request).await?;

        if !response.is_success() {
            return Err(DeliveryError::Status {
                table: row.table.clone(),
                status: response.status,
                reason: response.reason,
                body: response.body,
            });
        }

        debug!(
            table = %row.table,
            status = response.status,
            response = %response.body,
            "HTTP Status: {} {}",
            response.status,
            response.reason
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that answers from a script and records every request.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<DeliveryResponse, DeliveryError>>>,
        requests: Mutex<Vec<DeliveryRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<DeliveryResponse, DeliveryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<DeliveryRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn post(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(DeliveryResponse::new(200, "ok")))
        }
    }

    fn config(layout: DataLayout) -> DestinationConfig {
        DestinationConfig {
            endpoint: "http://bulker:3042".to_string(),
            destination_id: "dest-1".to_string(),
            auth_token: "secret".to_string(),
            data_layout: layout,
        }
    }

    fn ctx() -> InvocationContext {
        InvocationContext {
            workspace_id: "ws".to_string(),
            stream_id: "src".to_string(),
            destination_id: "dest-1".to_string(),
            connection_id: "conn".to_string(),
        }
    }

    fn signed_up() -> AnalyticsEvent {
        serde_json::from_value(json!({
            "type": "track",
            "event": "Signed Up",
            "userId": "u1",
            "properties": {"plan": "pro"}
        }))
        .unwrap()
    }

    #[test]
    fn test_delivery_url() {
        assert_eq!(
            delivery_url("http://bulker:3042", "dest-1", "events").unwrap(),
            "http://bulker:3042/post/dest-1?tableName=events"
        );
        assert_eq!(
            delivery_url("http://bulker:3042/", "dest-1", "Signed Up").unwrap(),
            "http://bulker:3042/post/dest-1?tableName=Signed+Up"
        );
        assert!(delivery_url("not a url", "d", "t").is_err());
    }

    #[test]
    fn test_metrics_meta_serialization() {
        let ctx = ctx();
        let meta = serde_json::to_value(MetricsMeta::new(&ctx)).unwrap();
        assert_eq!(
            meta,
            json!({
                "workspaceId": "ws",
                "streamId": "src",
                "destinationId": "dest-1",
                "connectionId": "conn",
                "functionId": "builtin.destination.bulker"
            })
        );
    }

    #[tokio::test]
    async fn test_dispatch_single_row() {
        let transport = ScriptedTransport::new(vec![]);
        let dispatcher = Dispatcher::new(config(DataLayout::SegmentSingleTable), transport.clone());

        let event = signed_up();
        let returned = dispatcher.dispatch(event.clone(), &ctx()).await.unwrap();
        assert_eq!(returned, event);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "http://bulker:3042/post/dest-1?tableName=events"
        );
        assert_eq!(requests[0].auth_token, "secret");

        let meta: Value = serde_json::from_str(&requests[0].metrics_meta).unwrap();
        assert_eq!(meta["functionId"], json!(FUNCTION_ID));
        assert_eq!(meta["workspaceId"], json!("ws"));

        let body: Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["user_id"], json!("u1"));
        assert_eq!(body["plan"], json!("pro"));
        assert_eq!(body["type"], json!("track"));
    }

    #[tokio::test]
    async fn test_dispatch_fan_out_in_order() {
        let transport = ScriptedTransport::new(vec![]);
        let dispatcher = Dispatcher::new(config(DataLayout::Segment), transport.clone());

        dispatcher.dispatch(signed_up(), &ctx()).await.unwrap();

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://bulker:3042/post/dest-1?tableName=tracks",
                "http://bulker:3042/post/dest-1?tableName=Signed+Up",
            ]
        );
    }

    #[tokio::test]
    async fn test_second_row_failure_aborts_with_one_retryable_error() {
        let transport = ScriptedTransport::new(vec![
            Ok(DeliveryResponse::new(200, "ok")),
            Ok(DeliveryResponse::new(500, "bulker down")),
            Ok(DeliveryResponse::new(200, "never used")),
        ]);
        let dispatcher = Dispatcher::new(config(DataLayout::Segment), transport.clone());

        let err = dispatcher.dispatch(signed_up(), &ctx()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(500));
        match &err {
            DispatchError::Retryable(DeliveryError::Status { table, body, .. }) => {
                assert_eq!(table, "Signed Up");
                assert_eq!(body, "bulker down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // first row delivered once, second attempted once, nothing retried
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_first_row_failure_skips_the_rest() {
        let transport = ScriptedTransport::new(vec![Err(DeliveryError::Connection(
            "connection refused".to_string(),
        ))]);
        let dispatcher = Dispatcher::new(config(DataLayout::Segment), transport.clone());

        let err = dispatcher.dispatch(signed_up(), &ctx()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_also_retryable() {
        let transport = ScriptedTransport::new(vec![Ok(DeliveryResponse::new(400, "bad"))]);
        let dispatcher = Dispatcher::new(config(DataLayout::Passthrough), transport);

        let err = dispatcher.dispatch(signed_up(), &ctx()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn test_client_ids_repaired_before_layout() {
        let transport = ScriptedTransport::new(vec![]);
        let dispatcher = Dispatcher::new(config(DataLayout::Passthrough), transport.clone());

        let event: AnalyticsEvent = serde_json::from_value(json!({
            "type": "page",
            "context": {"clientIds": {"ga4": {"clientId": "c1", "sessions": [1, 2]}}}
        }))
        .unwrap();

        let returned = dispatcher.dispatch(event.clone(), &ctx()).await.unwrap();
        // caller gets the untouched event back
        assert_eq!(returned, event);

        let body: Value = serde_json::from_str(&transport.requests()[0].body).unwrap();
        assert_eq!(
            body["context"]["clientIds"]["ga4"],
            json!({"clientId": "c1", "sessionIds": "[1,2]"})
        );
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_retryable_without_network() {
        let transport = ScriptedTransport::new(vec![]);
        let mut cfg = config(DataLayout::SegmentSingleTable);
        cfg.endpoint = "bulker without scheme".to_string();
        let dispatcher = Dispatcher::new(cfg, transport.clone());

        let err = dispatcher.dispatch(signed_up(), &ctx()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Retryable(DeliveryError::InvalidUrl(_))));
        assert!(transport.requests().is_empty());
    }
}
