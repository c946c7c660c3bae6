use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{Client, Connection, Event, Outgoing, QoS, RecvTimeoutError};

use edgeflow_core::{Batch, Destination, Issue, Lifecycle, StageBase, StageContext, StageError, StageResult};

use super::config::{MqttCommonConfig, MqttDestinationConfig};
use super::{connect, flush_disconnect};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Publishes each record as a JSON message
pub struct MqttClientDestination {
    base: StageBase,
    client: Option<Client>,
    topic: String,
    qos: QoS,
    retained: bool,
    stop: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttClientDestination {
    /// New, uninitialised destination
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            client: None,
            topic: String::new(),
            qos: QoS::AtMostOnce,
            retained: false,
            stop: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }
}

/// Keep the event loop moving so queued publishes reach the broker
fn drive(mut connection: Connection, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match connection.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                debug!("mqtt driver disconnected");
                return;
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!("broker connection failed: {}", err);
                thread::sleep(POLL_INTERVAL);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
    flush_disconnect(&mut connection);
    debug!("mqtt driver stopped");
}

impl Default for MqttClientDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for MqttClientDestination {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let common: MqttCommonConfig = match context.stage_config().bind("commonConf") {
            Ok(common) => common,
            Err(err) => return vec![context.create_config_issue("commonConf", &err.to_string())],
        };
        let config: MqttDestinationConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        if config.topic.is_empty() {
            return vec![context.create_config_issue("conf.topic", "topic is required")];
        }

        let (client, connection) = match connect(&common, context.stage_name()) {
            Ok(pair) => pair,
            Err(err) => return vec![context.create_config_issue("commonConf.brokerUrl", &err.to_string())],
        };
        self.stop.store(false, Ordering::Release);
        let stop = self.stop.clone();
        let driver = thread::Builder::new()
            .name(format!("{}-driver", context.stage_name()))
            .spawn(move || drive(connection, stop));
        match driver {
            Ok(driver) => self.driver = Some(driver),
            Err(err) => return vec![Issue::stage(format!("failed to spawn mqtt driver: {}", err))],
        }

        info!("mqtt destination publishing to '{}' on {}", config.topic, common.broker_url);
        self.client = Some(client);
        self.topic = config.topic;
        self.qos = common.qos.into();
        self.retained = config.retained;
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(err) = client.disconnect() {
                debug!("disconnect request failed: {}", err);
            }
        }
        self.stop.store(true, Ordering::Release);
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                error!("mqtt driver thread panicked");
            }
        }
        self.base.detach();
    }
}

impl Destination for MqttClientDestination {
    fn write(&mut self, batch: &Batch) -> StageResult<()> {
        let context = self.base.context()?.clone();
        let Some(client) = &self.client else {
            return Err(StageError::IllegalState {
                operation: "write",
                state: "created",
            });
        };
        for record in batch.records() {
            let payload = match record.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    context.to_error(StageError::Serialization(err.to_string()), record.clone());
                    continue;
                }
            };
            if let Err(err) = client.publish(self.topic.as_str(), self.qos, self.retained, payload) {
                debug!("publish of '{}' failed: {}", record.header().source_id, err);
                context.to_error(StageError::Transport(err.to_string()), record.clone());
            }
        }
        Ok(())
    }
}
