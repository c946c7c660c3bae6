use std::sync::Arc;

use log::{debug, info};

use edgeflow_core::{
    Batch, BatchMaker, ElVars, Field, FieldMap, Issue, Lifecycle, Processor, Record, RecordReaderFactory, StageBase,
    StageContext, StageError, StageResult,
};

use super::client::{HttpClient, HttpRequest};
use super::config::{HeaderOutputLocation, HttpCompression, HttpMethod, HttpProcessorConfig};
use super::gzip;

/// Enriches each record with the parsed response of a per-record request
pub struct HttpProcessor {
    base: StageBase,
    config: Option<HttpProcessorConfig>,
    client: Option<HttpClient>,
    parser: RecordReaderFactory,
}

impl HttpProcessor {
    /// New, uninitialised processor
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            config: None,
            client: None,
            parser: RecordReaderFactory::default(),
        }
    }

    fn build_request(
        &self,
        context: &dyn StageContext,
        config: &HttpProcessorConfig,
        vars: &ElVars,
    ) -> StageResult<HttpRequest> {
        let method = match config.http_method.as_str() {
            Some(method) => method.to_string(),
            None => context
                .evaluate(&config.method_expression, "conf.methodExpression", vars)?
                .to_text()
                .to_ascii_uppercase(),
        };
        let url = context.evaluate(&config.resource_url, "conf.resourceUrl", vars)?.to_text();
        let mut request = HttpRequest::new(method, url);

        if !config.request_body.is_empty() {
            let value = context.evaluate(&config.request_body, "conf.requestBody", vars)?;
            let mut body = serde_json::to_vec(&value).map_err(|e| StageError::Serialization(e.to_string()))?;
            if config.client.http_compression == HttpCompression::Gzip {
                body = gzip(&body)?;
                request = request.header("Content-Encoding", "gzip");
            }
            request = request.body(body);
        }

        let content_type = context
            .evaluate(&config.default_request_content_type, "conf.defaultRequestContentType", vars)?
            .to_text();
        if !content_type.is_empty() {
            request = request.header("Content-Type", content_type);
        }
        for (name, value) in config.headers.pairs() {
            let value = context.evaluate(&value, "conf.headers", vars)?.to_text();
            request = request.header(name, value);
        }
        Ok(request)
    }

    fn enrich(&self, context: &Arc<dyn StageContext>, record: &Record) -> StageResult<Record> {
        let (config, client) = match (&self.config, &self.client) {
            (Some(config), Some(client)) => (config, client),
            _ => {
                return Err(StageError::IllegalState {
                    operation: "process",
                    state: "created",
                })
            }
        };
        let vars = ElVars::new().with_record(record.clone());
        let request = self.build_request(context.as_ref(), config, &vars)?;

        let response = client
            .execute(&request)
            .map_err(|e| StageError::Request(e.to_string()))?;
        if !response.is_success() {
            let status = response.status_line();
            let reason = response.into_string().unwrap_or_default();
            return Err(StageError::Status { status, reason });
        }

        let headers = response.headers().to_vec();
        let mut reader = self
            .parser
            .create_reader(context.clone(), &record.header().source_id, response.into_body());
        let parsed = reader.read_record();
        reader.close();

        let mut enriched = record.clone();
        if let Some(parsed) = parsed? {
            if !enriched.set(&config.output_field, parsed.value().clone()) {
                return Err(StageError::InvalidField(config.output_field.clone()));
            }
        }

        match config.header_output_location {
            HeaderOutputLocation::Header => {
                for (name, value) in headers {
                    enriched.set_attribute(format!("{}{}", config.header_attribute_prefix, name), value);
                }
            }
            HeaderOutputLocation::Field => {
                let mut map = FieldMap::new();
                for (name, value) in headers {
                    match map.get_mut(&name) {
                        Some(Field::Text(existing)) => {
                            existing.push(',');
                            existing.push_str(&value);
                        }
                        _ => {
                            map.insert(name, Field::Text(value));
                        }
                    }
                }
                if !enriched.set(&config.header_output_field, Field::Map(map)) {
                    return Err(StageError::InvalidField(config.header_output_field.clone()));
                }
            }
            HeaderOutputLocation::None => {}
        }
        Ok(enriched)
    }
}

impl Default for HttpProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for HttpProcessor {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: HttpProcessorConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };

        let mut issues = Vec::new();
        if config.output_field.is_empty() {
            issues.push(context.create_config_issue("conf.outputField", "output field is required"));
        }
        if config.http_method == HttpMethod::Expression && config.method_expression.is_empty() {
            issues.push(context.create_config_issue(
                "conf.methodExpression",
                "method expression is required when the method is EXPRESSION",
            ));
        }
        if config.header_output_location == HeaderOutputLocation::Field && config.header_output_field.is_empty() {
            issues.push(context.create_config_issue("conf.headerOutputField", "header output field is required"));
        }
        match HttpClient::new(&config.client) {
            Ok(client) => self.client = Some(client),
            Err(err) => issues.push(context.create_config_issue("conf.client", &err.to_string())),
        }
        if !issues.is_empty() {
            return issues;
        }

        self.parser = RecordReaderFactory::new(config.data_format, config.data_format_config.clone());
        info!("http processor initialised for {}", config.resource_url);
        self.config = Some(config);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.client = None;
        self.base.detach();
    }
}

impl Processor for HttpProcessor {
    fn process(&mut self, batch: &Batch, batch_maker: &mut dyn BatchMaker) -> StageResult<()> {
        let context = self.base.context()?.clone();
        for record in batch.records() {
            match self.enrich(&context, record) {
                Ok(enriched) => batch_maker.add_record(enriched),
                Err(err) => {
                    debug!("record '{}' failed: {}", record.header().source_id, err);
                    context.to_error(err, record.clone());
                }
            }
        }
        Ok(())
    }
}
