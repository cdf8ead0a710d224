//! EventDispatcher processor.
//!
//! Receives change events emitted by the embedded CRM store and hands each
//! one to the [`EventPublisher`]. Events are published on their own tasks so
//! a slow subscriber on one event does not hold back the next.

use super::publisher::{DeliveryReport, EventPublisher};
use crate::PipelineError;
use crate::entities::ChangeEvent;
use crate::events::ChangeEventReceiver;
use kanau::processor::Processor;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

pub struct EventDispatcher {
    publisher: EventPublisher,
}

impl Processor<ChangeEvent> for EventDispatcher {
    type Output = DeliveryReport;
    type Error = PipelineError;
    async fn process(&self, event: ChangeEvent) -> Result<DeliveryReport, PipelineError> {
        self.publisher.publish(event).await
    }
}

impl EventDispatcher {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }

    /// Run until shutdown is signaled or the channel closes, then wait for
    /// in-flight fan-outs to settle.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>, mut event_rx: ChangeEventReceiver) {
        info!("EventDispatcher started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("EventDispatcher received shutdown signal");
                        break;
                    }
                }

                received = event_rx.recv() => {
                    let Some(event) = received else {
                        info!("Change event channel closed");
                        break;
                    };
                    debug!(event_id = %event.event_id, event_type = %event.event_type, "Received change event");
                    let dispatcher = EventDispatcher::new(self.publisher.clone());
                    in_flight.spawn(async move {
                        let event_id = event.event_id.clone();
                        if let Err(e) = dispatcher.process(event).await {
                            error!(event_id = %event_id, error = %e, "Failed to publish change event");
                        }
                    });
                }

                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!("EventDispatcher shutdown complete");
    }
}
