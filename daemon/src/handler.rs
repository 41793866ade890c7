//! Request handling for connected subscribers

use crate::broadcaster::SubscriberHub;
use crate::config::{validate_delay, Config, DEFAULT_DELAY};
use crate::enricher::PsStartTimes;
use crate::monitor::MonitorController;
use crate::protocol::{Request, Response, StatusData};
use crate::socket::RequestHandler;
use std::sync::Arc;

/// The monitor plus the hub its events go through.
pub struct MonitorService {
    pub monitor: MonitorController,
    pub hub: Arc<SubscriberHub>,
}

impl MonitorService {
    pub fn new(monitor: MonitorController, hub: Arc<SubscriberHub>) -> Self {
        Self { monitor, hub }
    }

    /// Wires `ps` enrichment and the configured sampling tool to `hub`.
    pub fn from_config(config: &Config, hub: Arc<SubscriberHub>) -> Self {
        let lookup = Arc::new(PsStartTimes::new(config.enricher.program.clone()));
        let monitor = MonitorController::new(config.sampler.program.clone(), hub.clone(), lookup);
        Self::new(monitor, hub)
    }

    fn ok() -> Response {
        Response::Response {
            id: None,
            data: serde_json::json!({"success": true}),
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for MonitorService {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Status => Response::Status {
                data: StatusData {
                    running: self.monitor.is_running().await,
                    delay: self.monitor.delay().await.unwrap_or(DEFAULT_DELAY),
                    filters: self.monitor.filters().await,
                    subscriber_count: self.hub.subscriber_count(),
                },
            },

            Request::SetFilter { params } => {
                self.monitor.set_filter(params.filters).await;
                Self::ok()
            }

            Request::Restart { params } => {
                let delay = params.delay.as_deref().map(validate_delay).unwrap_or(DEFAULT_DELAY);
                self.monitor.start(delay).await;
                Self::ok()
            }

            Request::Stop => {
                self.monitor.stop().await;
                Self::ok()
            }
        }
    }
}
