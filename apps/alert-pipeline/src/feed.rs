use crate::telemetry::{parse_feed_entry, SensorReading};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keepalive: Duration,
}

impl FeedConfig {
    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keepalive);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Handle to a running feed listener.
pub struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stops the listener and waits for it to exit. No reading is forwarded
    /// after this returns.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "feed listener task ended abnormally");
        }
    }
}

/// Starts the MQTT listener and forwards every decodable reading into `tx`.
pub fn subscribe(config: FeedConfig, tx: mpsc::Sender<SensorReading>) -> Subscription {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_listener(config, tx, cancel.clone()));
    Subscription { cancel, task }
}

async fn run_listener(
    config: FeedConfig,
    tx: mpsc::Sender<SensorReading>,
    cancel: CancellationToken,
) {
    let filter = format!("{}/+", config.topic_prefix);
    loop {
        let (client, mut eventloop) = AsyncClient::new(config.mqtt_options(), 32);

        if let Err(err) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
            tracing::warn!(error = %err, "failed to subscribe to telemetry feed; retrying");
        } else {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = client.try_disconnect();
                        return;
                    }
                    event = eventloop.poll() => event,
                };
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        tracing::info!(topic = %filter, "subscribed to telemetry feed");
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let mut payload = publish.payload.to_vec();
                        if !forward_entry(&config.topic_prefix, &publish.topic, &mut payload, &tx)
                            .await
                        {
                            tracing::info!("reading consumer dropped; stopping feed listener");
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "telemetry feed connection dropped; reconnecting"
                        );
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

/// Decodes one publish and forwards it. Returns `false` once the receiver is
/// gone.
async fn forward_entry(
    topic_prefix: &str,
    topic: &str,
    payload: &mut [u8],
    tx: &mpsc::Sender<SensorReading>,
) -> bool {
    match parse_feed_entry(topic_prefix, topic, payload, Utc::now()) {
        Ok(Some(reading)) => tx.send(reading).await.is_ok(),
        Ok(None) => true,
        Err(err) => {
            tracing::debug!(error = %err, topic = %topic, "dropping invalid telemetry entry");
            true
        }
    }
}
