//! The request pipeline: validate, acquire a pooled channel, translate once,
//! then attempt-loop with signing, MD5 integrity, retry decisions and batch
//! merge-on-retry, surfacing a typed response with request and trace ids.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use log::warn;
use prost::Message;
use uuid::Uuid;

use crate::auth::{self, Credentials};
use crate::convert::{self, batch};
use crate::endpoint::Endpoint;
use crate::http::pool::{ConnectionPool, PoolConfig};
use crate::http::{ChannelFactory, HttpChannel, HttpRequest, HttpResponse, TcpChannelFactory};
use crate::proto;
use crate::range_iter::RangeIterator;
use crate::request::*;
use crate::retry::{DefaultRetryStrategy, RetryStrategy};
use crate::{Result, TableStoreError, API_VERSION};

const USER_AGENT: &str = concat!("tablestore-rust-sdk/", env!("CARGO_PKG_VERSION"));

/// Client options. Defaults match the service's documented knobs.
pub struct ClientConfig {
    pub max_connections: usize,
    /// Bounds both TCP connects and waiting on a saturated pool, per attempt.
    pub connect_timeout: Duration,
    /// Per-attempt request deadline.
    pub request_timeout: Duration,
    /// When false, every call uses a fresh connection.
    pub enable_keep_alive: bool,
    pub retry_max_times: u32,
    /// Base for the exponential retry backoff.
    pub retry_interval: Duration,
    /// Verify `x-ots-contentmd5` on responses.
    pub check_response_digest: bool,
    /// Calls slower than this are logged.
    pub trace_threshold: Duration,
    /// Prototype cloned per call; `None` selects [`DefaultRetryStrategy`].
    pub retry_strategy: Option<Box<dyn RetryStrategy>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_connections: 5000,
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            enable_keep_alive: true,
            retry_max_times: 3,
            retry_interval: Duration::from_millis(100),
            check_response_digest: false,
            trace_threshold: Duration::from_millis(100),
            retry_strategy: None,
        }
    }
}

impl Clone for ClientConfig {
    fn clone(&self) -> Self {
        ClientConfig {
            max_connections: self.max_connections,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            enable_keep_alive: self.enable_keep_alive,
            retry_max_times: self.retry_max_times,
            retry_interval: self.retry_interval,
            check_response_digest: self.check_response_digest,
            trace_threshold: self.trace_threshold,
            retry_strategy: self.retry_strategy.clone(),
        }
    }
}

/// Handle to one service instance. Cheap to clone and safe to share across
/// tasks; every call independently borrows one pooled connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    instance_name: String,
    credentials: Credentials,
    config: ClientConfig,
    pool: ConnectionPool,
}

struct RawReply {
    body: Vec<u8>,
    request_id: String,
    trace_id: String,
}

fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

impl Client {
    /// Connects to `[http(s)://]host[:port]` with the bundled TCP transport.
    pub fn new(
        endpoint: &str,
        instance_name: &str,
        credentials: Credentials,
        config: ClientConfig,
    ) -> Result<Self> {
        let endpoint = Endpoint::parse(endpoint)?;
        let factory = Arc::new(TcpChannelFactory::new(
            endpoint,
            config.connect_timeout,
            config.request_timeout,
        ));
        Self::with_channel_factory(instance_name, credentials, config, factory)
    }

    /// Builds a client over a caller-supplied transport. For TLS setups and
    /// tests.
    pub fn with_channel_factory(
        instance_name: &str,
        credentials: Credentials,
        config: ClientConfig,
        factory: Arc<dyn ChannelFactory>,
    ) -> Result<Self> {
        if instance_name.is_empty() {
            return Err(TableStoreError::Validation(
                "instance name is not set".to_string(),
            ));
        }
        let pool = ConnectionPool::new(
            factory,
            PoolConfig {
                max_connections: config.max_connections,
                connect_timeout: config.connect_timeout,
                enable_keep_alive: config.enable_keep_alive,
            },
        );
        Ok(Client {
            inner: Arc::new(ClientInner {
                instance_name: instance_name.to_string(),
                credentials,
                config,
                pool,
            }),
        })
    }

    // ------------------------------------------------------------- table ops

    pub async fn list_table(&self) -> Result<ListTableResponse> {
        let pb = convert::build_list_table(&ListTableRequest)?;
        let reply = self.invoke(Action::ListTable, &pb).await?;
        finish(convert::parse_list_table(&reply.body), reply)
    }

    pub async fn create_table(&self, request: &CreateTableRequest) -> Result<CreateTableResponse> {
        request.validate()?;
        let pb = convert::build_create_table(request)?;
        let reply = self.invoke(Action::CreateTable, &pb).await?;
        finish(convert::parse_create_table(&reply.body), reply)
    }

    pub async fn describe_table(
        &self,
        request: &DescribeTableRequest,
    ) -> Result<DescribeTableResponse> {
        request.validate()?;
        let pb = convert::build_describe_table(request)?;
        let reply = self.invoke(Action::DescribeTable, &pb).await?;
        finish(convert::parse_describe_table(&reply.body), reply)
    }

    pub async fn update_table(&self, request: &UpdateTableRequest) -> Result<UpdateTableResponse> {
        request.validate()?;
        let pb = convert::build_update_table(request)?;
        let reply = self.invoke(Action::UpdateTable, &pb).await?;
        finish(convert::parse_update_table(&reply.body), reply)
    }

    pub async fn delete_table(&self, request: &DeleteTableRequest) -> Result<DeleteTableResponse> {
        request.validate()?;
        let pb = convert::build_delete_table(request)?;
        let reply = self.invoke(Action::DeleteTable, &pb).await?;
        finish(convert::parse_delete_table(&reply.body), reply)
    }

    // --------------------------------------------------------------- row ops

    pub async fn get_row(&self, request: &GetRowRequest) -> Result<GetRowResponse> {
        request.validate()?;
        let pb = convert::build_get_row(request)?;
        let reply = self.invoke(Action::GetRow, &pb).await?;
        finish(convert::parse_get_row(&reply.body), reply)
    }

    pub async fn put_row(&self, request: &PutRowRequest) -> Result<PutRowResponse> {
        request.validate()?;
        let pb = convert::build_put_row(request)?;
        let reply = self.invoke(Action::PutRow, &pb).await?;
        finish(convert::parse_put_row(&reply.body), reply)
    }

    pub async fn update_row(&self, request: &UpdateRowRequest) -> Result<UpdateRowResponse> {
        request.validate()?;
        let pb = convert::build_update_row(request)?;
        let reply = self.invoke(Action::UpdateRow, &pb).await?;
        finish(convert::parse_update_row(&reply.body), reply)
    }

    pub async fn delete_row(&self, request: &DeleteRowRequest) -> Result<DeleteRowResponse> {
        request.validate()?;
        let pb = convert::build_delete_row(request)?;
        let reply = self.invoke(Action::DeleteRow, &pb).await?;
        finish(convert::parse_delete_row(&reply.body), reply)
    }

    pub async fn get_range(&self, request: &GetRangeRequest) -> Result<GetRangeResponse> {
        request.validate()?;
        let pb = convert::build_get_range(request)?;
        let reply = self.invoke(Action::GetRange, &pb).await?;
        finish(convert::parse_get_range(&reply.body), reply)
    }

    /// Streams a range scan with read-ahead; see [`RangeIterator`].
    pub fn range_iterator(
        &self,
        criterion: RangeQueryCriterion,
        watermark: usize,
    ) -> RangeIterator {
        RangeIterator::new(self.clone(), criterion, watermark)
    }

    pub async fn compute_splits_by_size(
        &self,
        request: &ComputeSplitsBySizeRequest,
    ) -> Result<ComputeSplitsBySizeResponse> {
        request.validate()?;
        let pb = convert::build_compute_splits(request)?;
        let reply = self.invoke(Action::ComputeSplitPointsBySize, &pb).await?;
        finish(convert::parse_compute_splits(&reply.body), reply)
    }

    // ------------------------------------------------------------- batch ops

    pub async fn batch_get_row(&self, request: &BatchGetRowRequest) -> Result<BatchGetRowResponse> {
        request.validate()?;
        let initial = batch::build_batch_get(request)?;
        let (merged, reply) = self.invoke_batch_get(initial).await?;
        finish(batch::parse_batch_get(request, &merged), reply)
    }

    pub async fn batch_write_row(
        &self,
        request: &BatchWriteRowRequest,
    ) -> Result<BatchWriteRowResponse> {
        request.validate()?;
        let (initial, index) = batch::build_batch_write(request)?;
        let (merged, reply) = self.invoke_batch_write(initial).await?;
        finish(batch::parse_batch_write(request, &index, &merged), reply)
    }

    // --------------------------------------------------------------- pipeline

    fn retry_strategy(&self) -> Box<dyn RetryStrategy> {
        match &self.inner.config.retry_strategy {
            Some(prototype) => prototype.clone_box(),
            None => Box::new(DefaultRetryStrategy::new(
                self.inner.config.retry_max_times,
                self.inner.config.retry_interval,
            )),
        }
    }

    async fn invoke<M: Message>(&self, action: Action, pb: &M) -> Result<RawReply> {
        let body = pb.encode_to_vec();
        let trace_id = new_trace_id();
        let started = Instant::now();

        let mut channel = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|error| error.with_trace_id(&trace_id))?;
        let result = self
            .attempt_loop(action, &body, &trace_id, channel.as_mut())
            .await;
        self.inner.pool.release(channel);
        self.note_slow_call(action, &trace_id, started);

        match result {
            Ok((body, request_id)) => Ok(RawReply {
                body,
                request_id,
                trace_id,
            }),
            Err(error) => Err(error.with_trace_id(&trace_id)),
        }
    }

    async fn attempt_loop(
        &self,
        action: Action,
        body: &[u8],
        trace_id: &str,
        channel: &mut dyn HttpChannel,
    ) -> Result<(Vec<u8>, String)> {
        let mut strategy = self.retry_strategy();
        loop {
            match self.send_once(action, body, trace_id, channel).await {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    if !strategy.should_retry(action, &error) {
                        return Err(error);
                    }
                    let pause = strategy.next_pause();
                    warn!(
                        "{action} failed ({error}), retry {} in {pause:?}",
                        strategy.retries()
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    async fn send_once(
        &self,
        action: Action,
        body: &[u8],
        trace_id: &str,
        channel: &mut dyn HttpChannel,
    ) -> Result<(Vec<u8>, String)> {
        let request = self.build_http_request(action, body, trace_id)?;
        let response = channel.execute(&request).await?;
        let request_id = response.header("x-ots-requestid").map(str::to_string);

        if (200..300).contains(&response.status) {
            let request_id = request_id.ok_or_else(|| {
                TableStoreError::Protocol("no x-ots-requestid in response header".to_string())
            })?;
            if self.inner.config.check_response_digest {
                verify_response_digest(&response)?;
            }
            Ok((response.body, request_id))
        } else {
            match convert::parse_error_body(&response.body) {
                Some((code, message)) => Err(TableStoreError::Server {
                    status: response.status,
                    code,
                    message,
                    request_id,
                    trace_id: Some(trace_id.to_string()),
                }),
                None => Err(TableStoreError::Server {
                    status: response.status,
                    code: String::new(),
                    message: String::from_utf8_lossy(&response.body).into_owned(),
                    request_id,
                    trace_id: Some(trace_id.to_string()),
                }),
            }
        }
    }

    fn build_http_request(
        &self,
        action: Action,
        body: &[u8],
        trace_id: &str,
    ) -> Result<HttpRequest> {
        let inner = &self.inner;
        let content_md5 = BASE64.encode(md5::compute(body).0);

        let mut headers: Vec<(String, String)> = vec![
            ("x-ots-contentmd5".to_string(), content_md5),
            (
                "x-ots-date".to_string(),
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            ),
            ("x-ots-apiversion".to_string(), API_VERSION.to_string()),
            (
                "x-ots-accesskeyid".to_string(),
                inner.credentials.access_key_id.clone(),
            ),
        ];
        if let Some(token) = &inner.credentials.sts_token {
            headers.push(("x-ots-ststoken".to_string(), token.clone()));
        }
        headers.push((
            "x-ots-instancename".to_string(),
            inner.instance_name.clone(),
        ));
        headers.push(("x-ots-sdk-traceid".to_string(), trace_id.to_string()));
        headers.push(("UserAgent".to_string(), USER_AGENT.to_string()));

        for (name, value) in &headers {
            if value.contains('\r') || value.contains('\n') {
                return Err(TableStoreError::Validation(format!(
                    "header {name} contains CR or LF"
                )));
            }
        }

        let signature = auth::sign_request(
            &inner.credentials.access_key_secret,
            action,
            "POST",
            &headers,
        );
        headers.push(("x-ots-signature".to_string(), signature));

        Ok(HttpRequest {
            path: format!("/{}", action.name()),
            headers,
            body: body.to_vec(),
        })
    }

    fn note_slow_call(&self, action: Action, trace_id: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed >= self.inner.config.trace_threshold {
            warn!("slow call: {action} took {elapsed:?} (trace {trace_id})");
        }
    }

    // Batch attempts reshape the request between sends: after each response
    // the failed sub-rows are folded into the running merged response and
    // only they are resubmitted.

    async fn invoke_batch_get(
        &self,
        initial: proto::BatchGetRowRequest,
    ) -> Result<(proto::BatchGetRowResponse, RawReply)> {
        let action = Action::BatchGetRow;
        let trace_id = new_trace_id();
        let started = Instant::now();

        let mut channel = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|error| error.with_trace_id(&trace_id))?;

        let result = async {
            let mut strategy = self.retry_strategy();
            let mut current = initial.clone();
            let mut merged: Option<proto::BatchGetRowResponse> = None;
            loop {
                let body = current.encode_to_vec();
                match self
                    .send_once(action, &body, &trace_id, channel.as_mut())
                    .await
                {
                    Ok((bytes, request_id)) => {
                        let response =
                            proto::BatchGetRowResponse::decode(&bytes[..]).map_err(|e| {
                                TableStoreError::Protocol(format!("invalid response body: {e}"))
                            })?;
                        let folded = batch::merge_batch_get_response(merged.take(), response)?;
                        let failures = batch::batch_get_failures(&folded, response_status_ok());
                        let retriable = !failures.is_empty()
                            && failures
                                .iter()
                                .all(|failure| strategy.should_retry(action, failure));
                        if !retriable {
                            return Ok((folded, request_id));
                        }
                        current = batch::reduce_batch_get_request(&initial, &folded)?;
                        merged = Some(folded);
                        let pause = strategy.next_pause();
                        warn!(
                            "{action}: resubmitting {} failed rows, retry {} in {pause:?}",
                            current.tables.iter().map(|t| t.primary_key.len()).sum::<usize>(),
                            strategy.retries()
                        );
                        tokio::time::sleep(pause).await;
                    }
                    Err(error) => {
                        if !strategy.should_retry(action, &error) {
                            return Err(error);
                        }
                        let pause = strategy.next_pause();
                        warn!(
                            "{action} failed ({error}), retry {} in {pause:?}",
                            strategy.retries()
                        );
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
        .await;

        self.inner.pool.release(channel);
        self.note_slow_call(action, &trace_id, started);

        match result {
            Ok((merged, request_id)) => Ok((
                merged,
                RawReply {
                    body: Vec::new(),
                    request_id,
                    trace_id,
                },
            )),
            Err(error) => Err(error.with_trace_id(&trace_id)),
        }
    }

    async fn invoke_batch_write(
        &self,
        initial: proto::BatchWriteRowRequest,
    ) -> Result<(proto::BatchWriteRowResponse, RawReply)> {
        let action = Action::BatchWriteRow;
        let trace_id = new_trace_id();
        let started = Instant::now();

        let mut channel = self
            .inner
            .pool
            .acquire()
            .await
            .map_err(|error| error.with_trace_id(&trace_id))?;

        let result = async {
            let mut strategy = self.retry_strategy();
            let mut current = initial.clone();
            let mut merged: Option<proto::BatchWriteRowResponse> = None;
            loop {
                let body = current.encode_to_vec();
                match self
                    .send_once(action, &body, &trace_id, channel.as_mut())
                    .await
                {
                    Ok((bytes, request_id)) => {
                        let response =
                            proto::BatchWriteRowResponse::decode(&bytes[..]).map_err(|e| {
                                TableStoreError::Protocol(format!("invalid response body: {e}"))
                            })?;
                        let folded = batch::merge_batch_write_response(merged.take(), response)?;
                        let failures = batch::batch_write_failures(&folded, response_status_ok());
                        let retriable = !failures.is_empty()
                            && failures
                                .iter()
                                .all(|failure| strategy.should_retry(action, failure));
                        if !retriable {
                            return Ok((folded, request_id));
                        }
                        current = batch::reduce_batch_write_request(&initial, &folded)?;
                        merged = Some(folded);
                        let pause = strategy.next_pause();
                        warn!(
                            "{action}: resubmitting {} failed rows, retry {} in {pause:?}",
                            current.tables.iter().map(|t| t.rows.len()).sum::<usize>(),
                            strategy.retries()
                        );
                        tokio::time::sleep(pause).await;
                    }
                    Err(error) => {
                        if !strategy.should_retry(action, &error) {
                            return Err(error);
                        }
                        let pause = strategy.next_pause();
                        warn!(
                            "{action} failed ({error}), retry {} in {pause:?}",
                            strategy.retries()
                        );
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
        .await;

        self.inner.pool.release(channel);
        self.note_slow_call(action, &trace_id, started);

        match result {
            Ok((merged, request_id)) => Ok((
                merged,
                RawReply {
                    body: Vec::new(),
                    request_id,
                    trace_id,
                },
            )),
            Err(error) => Err(error.with_trace_id(&trace_id)),
        }
    }
}

/// Per-row batch errors carry the HTTP status of the attempt they arrived
/// with, which was a success at the request level.
fn response_status_ok() -> i32 {
    200
}

fn verify_response_digest(response: &HttpResponse) -> Result<()> {
    let expected = response.header("x-ots-contentmd5").ok_or_else(|| {
        TableStoreError::Protocol("no x-ots-contentmd5 in response header".to_string())
    })?;
    let actual = BASE64.encode(md5::compute(&response.body).0);
    if expected != actual {
        return Err(TableStoreError::ResponseDigestMismatch);
    }
    Ok(())
}

/// Every response carries the ids of the call that produced it.
trait AttachIds {
    fn attach_ids(&mut self, request_id: String, trace_id: String);
}

macro_rules! impl_attach_ids {
    ($($response:ty),* $(,)?) => {
        $(impl AttachIds for $response {
            fn attach_ids(&mut self, request_id: String, trace_id: String) {
                self.request_id = request_id;
                self.trace_id = trace_id;
            }
        })*
    };
}

impl_attach_ids!(
    ListTableResponse,
    CreateTableResponse,
    DescribeTableResponse,
    UpdateTableResponse,
    DeleteTableResponse,
    GetRowResponse,
    PutRowResponse,
    UpdateRowResponse,
    DeleteRowResponse,
    GetRangeResponse,
    BatchGetRowResponse,
    BatchWriteRowResponse,
    ComputeSplitsBySizeResponse,
);

fn finish<T: AttachIds>(parsed: Result<T>, reply: RawReply) -> Result<T> {
    match parsed {
        Ok(mut response) => {
            response.attach_ids(reply.request_id, reply.trace_id);
            Ok(response)
        }
        Err(error) => Err(error.with_trace_id(&reply.trace_id)),
    }
}
