//! The HTTP transport contract. The pipeline only depends on the
//! [`HttpChannel`] and [`ChannelFactory`] capabilities; the bundled
//! implementation speaks HTTP/1.1 over a plain TCP stream, and tests plug in
//! scripted channels the same way.

mod connection;
pub(crate) mod pool;

pub use connection::TcpChannelFactory;

use crate::Result;

/// One outgoing POST. The path is `"/" + action`; headers are emitted in
/// order, after the framing headers the transport itself owns.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: i32,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A single reusable connection. Implementations reconnect internally after
/// transport faults; `reset` clears any per-request state when a pooled
/// channel is handed back out.
#[async_trait::async_trait]
pub trait HttpChannel: Send + std::fmt::Debug {
    async fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse>;

    fn reset(&mut self) {}
}

/// Creates channels for the pool.
#[async_trait::async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn HttpChannel>>;
}
