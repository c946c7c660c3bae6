use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{Client, Connection, Event, Packet, RecvTimeoutError};

use edgeflow_core::{
    BatchMaker, Issue, Lifecycle, Origin, RecordReaderFactory, StageBase, StageContext, StageError, StageResult,
};

use super::config::{MqttCommonConfig, MqttOriginConfig};
use super::{connect, flush_disconnect};
use crate::bridge::{PushPullBridge, RecordPublisher};

/// Offset returned by every `produce`
pub const MQTT_OFFSET: &str = "mqtt";

/// How long the producer waits on the network before checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Pause after a connection error before the event loop reconnects
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Subscribes to topic filters and emits one record per parsed payload value
pub struct MqttClientOrigin {
    base: StageBase,
    client: Option<Client>,
    bridge: Option<PushPullBridge>,
    max_wait: Duration,
}

impl MqttClientOrigin {
    /// New, uninitialised origin
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            client: None,
            bridge: None,
            max_wait: Duration::from_millis(2000),
        }
    }

    fn start(
        &mut self,
        context: &Arc<dyn StageContext>,
        common: &MqttCommonConfig,
        config: &MqttOriginConfig,
    ) -> Result<(), Issue> {
        let (client, connection) = connect(common, context.stage_name())
            .map_err(|e| context.create_config_issue("commonConf.brokerUrl", &e.to_string()))?;
        for filter in &config.topic_filter {
            client
                .subscribe(filter.as_str(), common.qos.into())
                .map_err(|e| context.create_config_issue("conf.topicFilter", &e.to_string()))?;
        }

        let parser = RecordReaderFactory::new(config.data_format, config.data_format_config.clone());
        let producer_context = context.clone();
        let bridge = PushPullBridge::spawn(context.stage_name(), move |publisher| {
            pump(connection, parser, producer_context, publisher)
        })
        .map_err(|e| Issue::stage(e.to_string()))?;

        self.client = Some(client);
        self.bridge = Some(bridge);
        Ok(())
    }
}

/// Drive the connection and offer every parsed publish until shutdown
fn pump(
    mut connection: Connection,
    parser: RecordReaderFactory,
    context: Arc<dyn StageContext>,
    publisher: RecordPublisher,
) {
    'poll: while !publisher.is_shutdown() {
        match connection.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                debug!("message on '{}' ({} bytes)", publish.topic, publish.payload.len());
                let mut reader =
                    parser.create_reader_from_bytes(context.clone(), &publish.topic, publish.payload.to_vec());
                loop {
                    match reader.read_record() {
                        Ok(Some(record)) => {
                            if !publisher.offer(record) {
                                reader.close();
                                break 'poll;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            context.report_error(err.into());
                            break;
                        }
                    }
                }
                reader.close();
            }
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => info!("connected to broker"),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!("broker connection failed: {}", err);
                context.report_error(StageError::Transport(err.to_string()));
                if publisher.wait_shutdown(RECONNECT_DELAY) {
                    debug!("mqtt producer stopped after connection failure");
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("mqtt event loop closed");
                return;
            }
        }
    }
    flush_disconnect(&mut connection);
    debug!("mqtt producer stopped");
}

impl Default for MqttClientOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for MqttClientOrigin {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let common: MqttCommonConfig = match context.stage_config().bind("commonConf") {
            Ok(common) => common,
            Err(err) => return vec![context.create_config_issue("commonConf", &err.to_string())],
        };
        let config: MqttOriginConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        if config.topic_filter.is_empty() {
            return vec![context.create_config_issue("conf.topicFilter", "at least one topic filter is required")];
        }

        if let Err(issue) = self.start(&context, &common, &config) {
            return vec![issue];
        }
        info!(
            "mqtt origin subscribed to {:?} on {}",
            config.topic_filter, common.broker_url
        );
        self.max_wait = Duration::from_millis(config.max_wait_time);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(err) = client.disconnect() {
                debug!("disconnect request failed: {}", err);
            }
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown();
        }
        self.base.detach();
    }
}

impl Origin for MqttClientOrigin {
    fn produce(
        &mut self,
        _last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>> {
        self.base.context()?;
        let Some(bridge) = &self.bridge else {
            return Err(StageError::IllegalState {
                operation: "produce",
                state: "created",
            });
        };
        bridge
            .fill(self.max_wait, max_batch_size, batch_maker)
            .map_err(|e| StageError::Transport(e.to_string()))?;
        Ok(Some(MQTT_OFFSET.to_string()))
    }
}
