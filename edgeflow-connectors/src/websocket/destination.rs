use std::sync::Arc;

use log::{debug, info};
use tungstenite::Message;

use edgeflow_core::{Batch, Destination, Issue, Lifecycle, StageBase, StageContext, StageError, StageResult};

use super::{connect, Socket, WebSocketDestinationConfig};

/// Writes each record as a JSON text frame
pub struct WebSocketClientDestination {
    base: StageBase,
    socket: Option<Socket>,
}

impl WebSocketClientDestination {
    /// New, uninitialised destination
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            socket: None,
        }
    }
}

impl Default for WebSocketClientDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for WebSocketClientDestination {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: WebSocketDestinationConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        let url = match context.resolved_value(&config.resource_url) {
            Ok(url) => url.to_text(),
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        };
        let headers = crate::resolve_headers(context.as_ref(), &config.headers);
        match connect(&url, &headers, None) {
            Ok(socket) => self.socket = Some(socket),
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        }
        info!("websocket destination connected to {}", url);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close(None).and_then(|_| socket.flush()) {
                debug!("close failed: {}", err);
            }
        }
        self.base.detach();
    }
}

impl Destination for WebSocketClientDestination {
    fn write(&mut self, batch: &Batch) -> StageResult<()> {
        let context = self.base.context()?.clone();
        let Some(socket) = self.socket.as_mut() else {
            return Err(StageError::IllegalState {
                operation: "write",
                state: "created",
            });
        };
        for record in batch.records() {
            let json = match record.to_json() {
                Ok(json) => String::from_utf8_lossy(&json).into_owned(),
                Err(err) => {
                    context.to_error(StageError::Serialization(err.to_string()), record.clone());
                    continue;
                }
            };
            if let Err(err) = socket.send(Message::text(json)) {
                debug!("send of '{}' failed: {}", record.header().source_id, err);
                context.to_error(StageError::Transport(err.to_string()), record.clone());
            }
        }
        Ok(())
    }
}
