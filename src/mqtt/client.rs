use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use sqlx::PgPool;
use tokio::task::JoinHandle;

use super::handler::MqttMessageHandler;
use crate::config::MqttConfig;
use crate::realtime::TelemetryHub;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Doubling reconnect delay, capped
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Connect to the broker and feed every publish on the telemetry topic to the handler.
///
/// Runs until the task is aborted; connection errors only delay the next attempt.
pub fn spawn(settings: MqttConfig, pool: PgPool, hub: Arc<TelemetryHub>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let handler = Arc::new(MqttMessageHandler::new(pool, hub, settings.device_auth_required));
        let mut backoff = INITIAL_BACKOFF;

        tracing::info!(
            "MQTT client connecting to {}:{} (topic {})",
            settings.host,
            settings.port,
            settings.topic
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff = INITIAL_BACKOFF;
                    tracing::info!("MQTT connected, subscribing to {}", settings.topic);
                    if let Err(e) = client.try_subscribe(settings.topic.clone(), QoS::AtLeastOnce) {
                        tracing::error!("MQTT subscribe to {} failed: {}", settings.topic, e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle(&publish.topic, &publish.payload).await;
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}. Retrying in {:?}", e, backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_a_minute() {
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(40)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }
}
