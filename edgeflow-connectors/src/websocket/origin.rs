use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tungstenite::Message;

use edgeflow_core::{
    BatchMaker, Issue, Lifecycle, Origin, RecordReaderFactory, StageBase, StageContext, StageError, StageResult,
};

use super::{connect, is_timeout, Socket, WebSocketOriginConfig};
use crate::bridge::{PushPullBridge, RecordPublisher};

/// Offset returned by every `produce`
pub const WEBSOCKET_OFFSET: &str = "webSocket";

/// Socket read timeout; bounds how late the producer notices shutdown
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Streams messages from a WebSocket endpoint
pub struct WebSocketClientOrigin {
    base: StageBase,
    bridge: Option<PushPullBridge>,
    max_wait: Duration,
}

impl WebSocketClientOrigin {
    /// New, uninitialised origin
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            bridge: None,
            max_wait: Duration::from_millis(2000),
        }
    }
}

/// Read messages and offer their records until shutdown or close
fn pump(
    mut socket: Socket,
    parser: RecordReaderFactory,
    context: Arc<dyn StageContext>,
    publisher: RecordPublisher,
) {
    let mut messages: u64 = 0;
    loop {
        if publisher.is_shutdown() {
            if let Err(err) = socket.close(None).and_then(|_| socket.flush()) {
                debug!("close on shutdown failed: {}", err);
            }
            break;
        }
        let payload = match socket.read() {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(bytes)) => bytes.to_vec(),
            Ok(Message::Close(frame)) => {
                let (code, message) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                info!("server closed the connection ({})", code);
                context.report_error(StageError::ConnectionClosed { code, message });
                break;
            }
            Ok(_) => continue,
            Err(err) if is_timeout(&err) => continue,
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => break,
            Err(err) => {
                warn!("websocket read failed: {}", err);
                context.report_error(StageError::Transport(err.to_string()));
                break;
            }
        };

        let message_id = format!("{}-{}", WEBSOCKET_OFFSET, messages);
        messages += 1;
        let mut reader = parser.create_reader_from_bytes(context.clone(), &message_id, payload);
        loop {
            match reader.read_record() {
                Ok(Some(record)) => {
                    if !publisher.offer(record) {
                        reader.close();
                        return;
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
    debug!("websocket producer stopped");
}

impl Default for WebSocketClientOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for WebSocketClientOrigin {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: WebSocketOriginConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        let url = match context.resolved_value(&config.resource_url) {
            Ok(url) => url.to_text(),
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        };
        let headers = crate::resolve_headers(context.as_ref(), &config.headers);

        let mut socket = match connect(&url, &headers, Some(READ_TIMEOUT)) {
            Ok(socket) => socket,
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        };
        if !config.request_body.is_empty() {
            if let Err(err) = socket.send(Message::text(config.request_body.clone())) {
                return vec![context.create_config_issue("conf.requestBody", &err.to_string())];
            }
        }

        let parser = RecordReaderFactory::new(config.data_format, config.data_format_config.clone());
        let producer_context = context.clone();
        let bridge = PushPullBridge::spawn(context.stage_name(), move |publisher| {
            pump(socket, parser, producer_context, publisher)
        });
        match bridge {
            Ok(bridge) => self.bridge = Some(bridge),
            Err(err) => return vec![Issue::stage(err.to_string())],
        }

        info!("websocket origin connected to {}", url);
        self.max_wait = Duration::from_millis(config.max_wait_time);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown();
        }
        self.base.detach();
    }
}

impl Origin for WebSocketClientOrigin {
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
        Ok(Some(WEBSOCKET_OFFSET.to_string()))
    }
}
