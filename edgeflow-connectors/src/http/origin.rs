use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info};
use url::Url;

use edgeflow_core::{
    BatchMaker, Issue, Lifecycle, Origin, RecordReader, RecordReaderFactory, StageBase, StageContext, StageError,
    StageResult,
};

use super::client::{HttpClient, HttpRequest};
use super::config::{HttpMode, HttpOriginConfig};
use crate::resolve_headers;

/// Offset returned by every `produce`
pub const HTTP_OFFSET: &str = "http";

/// Fetches a resource and turns the response body into records
pub struct HttpClientOrigin {
    base: StageBase,
    config: Option<HttpOriginConfig>,
    client: Option<HttpClient>,
    parser: RecordReaderFactory,
    headers: Vec<(String, String)>,
    method: &'static str,
    url: String,
    /// Open response body kept between streaming calls
    stream: Option<Box<dyn RecordReader>>,
    requests: u64,
}

impl HttpClientOrigin {
    /// New, uninitialised origin
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            config: None,
            client: None,
            parser: RecordReaderFactory::default(),
            headers: Vec::new(),
            method: "GET",
            url: String::new(),
            stream: None,
            requests: 0,
        }
    }

    fn parts(&self) -> StageResult<(&HttpOriginConfig, &HttpClient)> {
        match (&self.config, &self.client) {
            (Some(config), Some(client)) => Ok((config, client)),
            _ => Err(StageError::IllegalState {
                operation: "produce",
                state: "created",
            }),
        }
    }

    /// Issue the configured request and wrap a 2xx body in a reader
    fn fetch(&mut self) -> StageResult<Box<dyn RecordReader>> {
        let context = self.base.context()?.clone();
        let (config, client) = self.parts()?;

        let mut request = HttpRequest::new(self.method, self.url.as_str());
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !config.request_body.is_empty() {
            request = request.body(config.request_body.clone().into_bytes());
        }

        let response = client
            .execute(&request)
            .map_err(|e| StageError::Request(e.to_string()))?;
        if !response.is_success() {
            let status = response.status_line();
            let reason = response.into_string().unwrap_or_default();
            return Err(StageError::Status { status, reason });
        }

        let message_id = format!("{}-{}", HTTP_OFFSET, self.requests);
        self.requests += 1;
        debug!("reading response {} from {}", message_id, self.url);
        Ok(self.parser.create_reader(context, &message_id, response.into_body()))
    }

    fn poll(&mut self, batch_maker: &mut dyn BatchMaker) -> StageResult<()> {
        let mut reader = self.fetch()?;
        let result = loop {
            match reader.read_record() {
                Ok(Some(record)) => batch_maker.add_record(record),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err.into()),
            }
        };
        reader.close();
        result
    }

    fn stream(&mut self, batch_maker: &mut dyn BatchMaker) -> StageResult<()> {
        let limit = self.parts()?.0.basic.max_batch_size;
        let mut count = 0;
        while count < limit {
            let mut reader = match self.stream.take() {
                Some(reader) => reader,
                None => self.fetch()?,
            };
            match reader.read_record() {
                Ok(Some(record)) => {
                    batch_maker.add_record(record);
                    count += 1;
                    self.stream = Some(reader);
                }
                Ok(None) => {
                    reader.close();
                    break;
                }
                Err(err) => {
                    reader.close();
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}

impl Default for HttpClientOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for HttpClientOrigin {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: HttpOriginConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        let Some(method) = config.http_method.as_str() else {
            return vec![context.create_config_issue(
                "conf.httpMethod",
                "EXPRESSION is not supported by the origin",
            )];
        };

        let url = match context.resolved_value(&config.resource_url) {
            Ok(url) => url.to_text(),
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        };
        if let Err(err) = Url::parse(&url) {
            return vec![context.create_config_issue("conf.resourceUrl", &format!("invalid URL '{}': {}", url, err))];
        }

        let client = match HttpClient::new(&config.client) {
            Ok(client) => client,
            Err(err) => return vec![context.create_config_issue("conf.client", &err.to_string())],
        };

        self.headers = resolve_headers(context.as_ref(), &config.headers);
        self.parser = RecordReaderFactory::new(config.data_format, config.data_format_config.clone());
        info!("http origin {} initialised in {:?} mode", url, config.http_mode);
        self.method = method;
        self.url = url;
        self.client = Some(client);
        self.config = Some(config);
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        if let Some(mut reader) = self.stream.take() {
            reader.close();
        }
        self.client = None;
        self.base.detach();
    }
}

impl Origin for HttpClientOrigin {
    fn produce(
        &mut self,
        _last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>> {
        let context = self.base.context()?.clone();
        if max_batch_size == 0 {
            return Ok(Some(HTTP_OFFSET.to_string()));
        }

        let (config, _) = self.parts()?;
        let (mode, interval) = (config.http_mode, config.polling_interval);
        match mode {
            HttpMode::Polling => {
                if interval > 0 {
                    thread::sleep(Duration::from_millis(interval));
                }
                if let Err(err) = self.poll(batch_maker) {
                    context.report_error(err);
                }
            }
            HttpMode::Streaming => self.stream(batch_maker)?,
            HttpMode::Batch => return Err(StageError::BatchModeUnsupported),
        }
        Ok(Some(HTTP_OFFSET.to_string()))
    }
}
