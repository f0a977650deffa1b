pub mod test_batch;
pub mod test_range_iter;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tablestore::http::{ChannelFactory, HttpChannel, HttpRequest, HttpResponse};
use tablestore::{Client, ClientConfig, Credentials, Result, TableStoreError};

/// One scripted reply from the fake service.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: i32,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub transport_failure: bool,
}

impl Reply {
    /// A 200 with a request id, as the server always sends.
    pub fn ok(body: Vec<u8>) -> Self {
        Reply {
            status: 200,
            headers: vec![("x-ots-requestid".to_string(), "req-0001".to_string())],
            body,
            transport_failure: false,
        }
    }

    /// A non-2xx with a protobuf error body.
    pub fn server_error(status: i32, code: &str, message: &str) -> Self {
        use prost::Message;
        let body = tablestore::proto::Error {
            code: code.to_string(),
            message: Some(message.to_string()),
        }
        .encode_to_vec();
        Reply {
            status,
            headers: vec![("x-ots-requestid".to_string(), "req-err".to_string())],
            body,
            transport_failure: false,
        }
    }

    /// A connection-level failure before any status line.
    pub fn transport_failure() -> Self {
        Reply {
            status: 0,
            headers: Vec::new(),
            body: Vec::new(),
            transport_failure: true,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn without_request_id(mut self) -> Self {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case("x-ots-requestid"));
        self
    }
}

/// A channel factory replaying a fixed reply script while recording every
/// request the pipeline sends.
pub struct ScriptedFactory {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedFactory {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(ScriptedFactory {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[derive(Debug)]
struct ScriptedChannel {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

#[async_trait::async_trait]
impl HttpChannel for ScriptedChannel {
    async fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted: unexpected request");
        if reply.transport_failure {
            return Err(TableStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        Ok(HttpResponse {
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
        })
    }
}

#[async_trait::async_trait]
impl ChannelFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn HttpChannel>> {
        Ok(Box::new(ScriptedChannel {
            replies: self.replies.clone(),
            requests: self.requests.clone(),
        }))
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        retry_interval: std::time::Duration::from_millis(1),
        trace_threshold: std::time::Duration::from_secs(3600),
        ..ClientConfig::default()
    }
}

pub fn scripted_client(
    replies: Vec<Reply>,
    config: ClientConfig,
) -> (Client, Arc<ScriptedFactory>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let factory = ScriptedFactory::new(replies);
    let client = Client::with_channel_factory(
        "test-instance",
        Credentials::new("test-access-key-id", "test-access-key-secret").unwrap(),
        config,
        factory.clone(),
    )
    .unwrap();
    (client, factory)
}
