//! Fan-out of results to the configured sinks

use super::chat::ChatClient;
use super::mail::MailTransport;
use super::template::render;
use super::trap::TrapSender;
use crate::bulk::{BulkIndexWriter, IndexRequest};
use crate::error::{SinkError, SinkResult};
use crate::kafka::BusPublisher;
use crate::metrics::ProcessorMetrics;
use crate::result::MetricResult;
use chrono::SecondsFormat;
use futures::future::join_all;
use metricflow_types::{RetentionLevel, SinkDescriptor};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Project used in index names when the result has none
pub const NO_PROJECT: &str = "no-project";

const DEFAULT_SUBJECT: &str = "[metricflow] {{name}} {{project}}: {{value}}";

/// Results waiting per notification sink before new ones are dropped
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Shared delivery clients; a sink kind may only be used when its client
/// is present.
#[derive(Clone, Default)]
pub struct SinkTransports {
    pub bus: Option<Arc<dyn BusPublisher>>,
    pub index_writer: Option<Arc<BulkIndexWriter>>,
    pub mail: Option<Arc<dyn MailTransport>>,
    pub chat: Option<Arc<dyn ChatClient>>,
    pub trap: Option<Arc<dyn TrapSender>>,
}

impl SinkTransports {
    pub fn with_bus(mut self, bus: Arc<dyn BusPublisher>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_index_writer(mut self, writer: Arc<BulkIndexWriter>) -> Self {
        self.index_writer = Some(writer);
        self
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailTransport>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatClient>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_trap(mut self, trap: Arc<dyn TrapSender>) -> Self {
        self.trap = Some(trap);
        self
    }
}

/// One configured sink with its client
pub enum SinkHandler {
    Bus {
        topic: String,
        publisher: Arc<dyn BusPublisher>,
    },
    SearchIndex {
        index: String,
        retention: RetentionLevel,
        writer: Arc<BulkIndexWriter>,
    },
    Email {
        address: String,
        subject: String,
        template: String,
        transport: Arc<dyn MailTransport>,
    },
    Chat {
        webhook_url: String,
        template: String,
        client: Arc<dyn ChatClient>,
    },
    Trap {
        target: String,
        community: String,
        oid: String,
        sender: Arc<dyn TrapSender>,
    },
    Console,
}

impl SinkHandler {
    pub fn build(descriptor: &SinkDescriptor, transports: &SinkTransports) -> SinkResult<Self> {
        let missing = || SinkError::NotConfigured(descriptor.kind());
        Ok(match descriptor {
            SinkDescriptor::Bus { topic } => SinkHandler::Bus {
                topic: topic.clone(),
                publisher: transports.bus.clone().ok_or_else(missing)?,
            },
            SinkDescriptor::SearchIndex { index, retention } => SinkHandler::SearchIndex {
                index: index.clone(),
                retention: *retention,
                writer: transports.index_writer.clone().ok_or_else(missing)?,
            },
            SinkDescriptor::Email {
                address,
                subject,
                template,
            } => SinkHandler::Email {
                address: address.clone(),
                subject: subject.clone().unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
                template: template.clone(),
                transport: transports.mail.clone().ok_or_else(missing)?,
            },
            SinkDescriptor::Chat {
                webhook_url,
                template,
            } => SinkHandler::Chat {
                webhook_url: webhook_url.clone(),
                template: template.clone(),
                client: transports.chat.clone().ok_or_else(missing)?,
            },
            SinkDescriptor::Trap {
                target,
                community,
                oid,
            } => SinkHandler::Trap {
                target: target.clone(),
                community: community.clone(),
                oid: oid.clone(),
                sender: transports.trap.clone().ok_or_else(missing)?,
            },
            SinkDescriptor::Console => SinkHandler::Console,
        })
    }

    /// Email, chat and trap sinks are delivered off the ingest path
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            SinkHandler::Email { .. } | SinkHandler::Chat { .. } | SinkHandler::Trap { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SinkHandler::Bus { .. } => "bus",
            SinkHandler::SearchIndex { .. } => "search_index",
            SinkHandler::Email { .. } => "email",
            SinkHandler::Chat { .. } => "chat",
            SinkHandler::Trap { .. } => "trap",
            SinkHandler::Console => "console",
        }
    }

    async fn deliver(&self, pipeline: &str, result: &MetricResult) -> SinkResult<()> {
        let kind = self.kind();
        match self {
            SinkHandler::Bus { topic, publisher } => {
                let payload = serde_json::to_vec(&json!({ "keys": result.keys, "result": result }))
                    .map_err(|e| SinkError::Render(e.to_string()))?;
                publisher
                    .publish(topic, &result.keys.to_string(), &payload)
                    .await
                    .map_err(|e| SinkError::delivery(kind, e))
            }
            SinkHandler::SearchIndex {
                index,
                retention,
                writer,
            } => {
                let project = match result.keys.project() {
                    "" => NO_PROJECT,
                    project => project,
                };
                writer
                    .process(IndexRequest {
                        timestamp: result.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                        index: index.clone(),
                        retention: *retention,
                        project: project.to_string(),
                        document: result.to_document(),
                    })
                    .map_err(|e| SinkError::delivery(kind, e))
            }
            SinkHandler::Email {
                address,
                subject,
                template,
                transport,
            } => transport
                .send(address, &render(subject, result), &render(template, result))
                .await
                .map_err(|e| SinkError::delivery(kind, e)),
            SinkHandler::Chat {
                webhook_url,
                template,
                client,
            } => client
                .post(webhook_url, &render(template, result))
                .await
                .map_err(|e| SinkError::delivery(kind, e)),
            SinkHandler::Trap {
                target,
                community,
                oid,
                sender,
            } => {
                let message = format!(
                    "{} {}={} [{}, {})",
                    result.keys,
                    result.keys.project(),
                    result.value,
                    result.window.start_millis(),
                    result.window.end_millis()
                );
                sender
                    .send(target, community, oid, &message)
                    .await
                    .map_err(|e| SinkError::delivery(kind, e))
            }
            SinkHandler::Console => {
                info!(pipeline, result = %result.to_document(), "metric result");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for SinkHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkHandler::Bus { topic, .. } => f.debug_struct("Bus").field("topic", topic).finish(),
            SinkHandler::SearchIndex { index, retention, .. } => f
                .debug_struct("SearchIndex")
                .field("index", index)
                .field("retention", retention)
                .finish(),
            SinkHandler::Email { address, .. } => {
                f.debug_struct("Email").field("address", address).finish()
            }
            SinkHandler::Chat { webhook_url, .. } => {
                f.debug_struct("Chat").field("webhook_url", webhook_url).finish()
            }
            SinkHandler::Trap { target, oid, .. } => f
                .debug_struct("Trap")
                .field("target", target)
                .field("oid", oid)
                .finish(),
            SinkHandler::Console => f.write_str("Console"),
        }
    }
}

/// Outcome of routing one result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Inline sinks that accepted the result
    pub delivered: usize,
    /// Notification sinks the result was queued for
    pub queued: usize,
    pub failed: usize,
}

/// Log and count the outcome of one delivery; true when it succeeded
fn record_delivery(
    metrics: &ProcessorMetrics,
    pipeline: &str,
    kind: &'static str,
    result: &MetricResult,
    outcome: SinkResult<()>,
) -> bool {
    match outcome {
        Ok(()) => {
            metrics.record_sink_delivery(pipeline, kind);
            true
        }
        Err(e) => {
            metrics.record_sink_failure(pipeline, kind);
            warn!(
                pipeline = %pipeline,
                sink = kind,
                key = %result.keys,
                window = %result.window,
                error = %e,
                "sink delivery failed"
            );
            false
        }
    }
}

/// Bounded queue in front of a notification sink, drained by its own task
struct NotificationLane {
    kind: &'static str,
    tx: Mutex<Option<mpsc::Sender<MetricResult>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationLane {
    fn spawn(handler: SinkHandler, pipeline: String, metrics: ProcessorMetrics, capacity: usize) -> Self {
        let kind = handler.kind();
        let (tx, mut rx) = mpsc::channel::<MetricResult>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                let outcome = handler.deliver(&pipeline, &result).await;
                record_delivery(&metrics, &pipeline, kind, &result, outcome);
            }
            debug!(pipeline = %pipeline, sink = kind, "notification lane stopped");
        });
        Self {
            kind,
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }

    fn enqueue(&self, result: &MetricResult) -> SinkResult<()> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return Err(SinkError::Closed(self.kind));
        };
        tx.try_send(result.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull(self.kind),
            TrySendError::Closed(_) => SinkError::Closed(self.kind),
        })
    }

    async fn close(&self) {
        self.tx.lock().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(sink = self.kind, error = %e, "notification lane ended abnormally");
            }
        }
    }
}

enum Route {
    /// Awaited in order with the record that closed the window
    Inline(SinkHandler),
    Queued(NotificationLane),
}

/// The sinks of one pipeline, built once at startup.
///
/// Bus, search-index and console sinks are delivered inline so bus output
/// keeps the per-key order of the results. Notification sinks get a
/// bounded queue each; a slow transport never holds up ingestion, and a
/// full queue drops the result with a warning.
pub struct SinkRouter {
    pipeline: String,
    routes: Vec<Route>,
    metrics: ProcessorMetrics,
}

impl SinkRouter {
    /// Build the handlers; notification lanes are spawned on the current
    /// tokio runtime.
    pub fn build(
        pipeline: impl Into<String>,
        descriptors: &[SinkDescriptor],
        transports: &SinkTransports,
        metrics: ProcessorMetrics,
    ) -> SinkResult<Self> {
        Self::build_with_capacity(
            pipeline,
            descriptors,
            transports,
            metrics,
            NOTIFICATION_QUEUE_CAPACITY,
        )
    }

    pub fn build_with_capacity(
        pipeline: impl Into<String>,
        descriptors: &[SinkDescriptor],
        transports: &SinkTransports,
        metrics: ProcessorMetrics,
        queue_capacity: usize,
    ) -> SinkResult<Self> {
        let pipeline = pipeline.into();
        let handlers = descriptors
            .iter()
            .map(|d| SinkHandler::build(d, transports))
            .collect::<SinkResult<Vec<_>>>()?;
        let routes = handlers
            .into_iter()
            .map(|handler| {
                if handler.is_notification() {
                    Route::Queued(NotificationLane::spawn(
                        handler,
                        pipeline.clone(),
                        metrics.clone(),
                        queue_capacity,
                    ))
                } else {
                    Route::Inline(handler)
                }
            })
            .collect();
        Ok(Self {
            pipeline,
            routes,
            metrics,
        })
    }

    /// Kinds of the configured sinks, in declaration order
    pub fn sink_kinds(&self) -> Vec<&'static str> {
        self.routes
            .iter()
            .map(|route| match route {
                Route::Inline(handler) => handler.kind(),
                Route::Queued(lane) => lane.kind,
            })
            .collect()
    }

    /// Deliver `result` to every sink.
    ///
    /// Inline sinks run concurrently and are awaited; notification sinks
    /// only get the result queued. A failure is logged and counted and never
    /// affects the other sinks.
    pub async fn route(&self, result: &MetricResult) -> RouteReport {
        let inline = self.routes.iter().filter_map(|route| match route {
            Route::Inline(handler) => Some(handler),
            Route::Queued(_) => None,
        });
        let outcomes = join_all(inline.map(|handler| async move {
            (handler.kind(), handler.deliver(&self.pipeline, result).await)
        }))
        .await;

        let mut report = RouteReport::default();
        for (kind, outcome) in outcomes {
            if record_delivery(&self.metrics, &self.pipeline, kind, result, outcome) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        for route in &self.routes {
            let Route::Queued(lane) = route else { continue };
            match lane.enqueue(result) {
                Ok(()) => report.queued += 1,
                Err(e) => {
                    report.failed += 1;
                    record_delivery(&self.metrics, &self.pipeline, lane.kind, result, Err(e));
                }
            }
        }
        report
    }

    /// Stop accepting notifications and wait until the queued ones are
    /// delivered
    pub async fn close(&self) {
        for route in &self.routes {
            if let Route::Queued(lane) = route {
                lane.close().await;
            }
        }
    }
}

impl std::fmt::Debug for SinkRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRouter")
            .field("pipeline", &self.pipeline)
            .field("sinks", &self.sink_kinds())
            .finish()
    }
}
