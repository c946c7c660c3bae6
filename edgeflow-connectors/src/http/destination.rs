use std::sync::Arc;

use log::{debug, info, warn};

use edgeflow_core::{
    Batch, Destination, ElVars, Issue, Lifecycle, Record, StageBase, StageContext, StageError, StageResult,
};

use super::client::{HttpClient, HttpRequest};
use super::config::{HttpDestinationConfig, HttpMethod};

/// Writes records to an HTTP endpoint as JSON
pub struct HttpClientDestination {
    base: StageBase,
    config: Option<HttpDestinationConfig>,
    client: Option<HttpClient>,
}

impl HttpClientDestination {
    /// New, uninitialised destination
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            config: None,
            client: None,
        }
    }

    fn parts(&self) -> StageResult<(&HttpDestinationConfig, &HttpClient)> {
        match (&self.config, &self.client) {
            (Some(config), Some(client)) => Ok((config, client)),
            _ => Err(StageError::IllegalState {
                operation: "write",
                state: "created",
            }),
        }
    }

    fn request(
        &self,
        context: &dyn StageContext,
        vars: &ElVars,
        body: Vec<u8>,
    ) -> StageResult<HttpRequest> {
        let (config, _) = self.parts()?;
        let url = context.evaluate(&config.resource_url, "conf.resourceUrl", vars)?.to_text();
        let method = config.http_method.as_str().unwrap_or("POST");
        let mut request = HttpRequest::new(method, url)
            .header("Content-Type", "application/json")
            .body(body);
        for (name, value) in config.headers.pairs() {
            let value = context.evaluate(&value, "conf.headers", vars)?.to_text();
            request = request.header(name, value);
        }
        Ok(request)
    }

    fn send(&self, request: &HttpRequest) -> StageResult<()> {
        let (_, client) = self.parts()?;
        let response = client
            .execute(request)
            .map_err(|e| StageError::Request(e.to_string()))?;
        let status = response.status_line();
        let success = response.is_success();
        // drain so the connection can be reused
        let body = response.into_string().unwrap_or_default();
        if !success {
            return Err(StageError::Status { status, reason: body });
        }
        Ok(())
    }

    fn write_record(&self, context: &dyn StageContext, record: &Record) -> StageResult<()> {
        let body = record.to_json().map_err(|e| StageError::Serialization(e.to_string()))?;
        let vars = ElVars::new().with_record(record.clone());
        let request = self.request(context, &vars, body)?;
        self.send(&request)
    }

    fn write_batch(&self, context: &dyn StageContext, batch: &Batch) -> StageResult<()> {
        let mut body = Vec::new();
        for record in batch.records() {
            let json = record.to_json().map_err(|e| StageError::Serialization(e.to_string()))?;
            if !body.is_empty() {
                body.push(b'\n');
            }
            body.extend_from_slice(&json);
        }
        let request = self.request(context, &ElVars::new(), body)?;
        self.send(&request)
    }
}

impl Default for HttpClientDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for HttpClientDestination {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: HttpDestinationConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        if config.http_method == HttpMethod::Expression {
            return vec![context.create_config_issue(
                "conf.httpMethod",
                "EXPRESSION is not supported by the destination",
            )];
        }
        let client = match HttpClient::new(&config.client) {
            Ok(client) => client,
            Err(err) => return vec![context.create_config_issue("conf.client", &err.to_string())],
        };

        info!(
            "http destination initialised for {} (one request per batch: {})",
            config.resource_url, config.one_request_per_batch
        );
        self.client = Some(client);
        self.config = Some(config);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.client = None;
        self.base.detach();
    }
}

impl Destination for HttpClientDestination {
    fn write(&mut self, batch: &Batch) -> StageResult<()> {
        let context = self.base.context()?.clone();
        if batch.is_empty() {
            return Ok(());
        }

        if self.parts()?.0.one_request_per_batch {
            if let Err(err) = self.write_batch(context.as_ref(), batch) {
                warn!("batch of {} records failed: {}", batch.len(), err);
                let message = err.to_string();
                for record in batch.records() {
                    context.to_error(StageError::Transport(message.clone()), record.clone());
                }
            }
            return Ok(());
        }

        for record in batch.records() {
            if let Err(err) = self.write_record(context.as_ref(), record) {
                debug!("record '{}' failed: {}", record.header().source_id, err);
                context.to_error(err, record.clone());
            }
        }
        Ok(())
    }
}
