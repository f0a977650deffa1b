//! A minimal HTTP/1.1 client channel over `tokio::net::TcpStream`:
//! keep-alive POSTs with content-length framed bodies, which is all the
//! service speaks.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use super::{ChannelFactory, HttpChannel, HttpRequest, HttpResponse};
use crate::endpoint::{Endpoint, Scheme};
use crate::{Result, TableStoreError};

pub struct TcpChannelFactory {
    endpoint: Endpoint,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpChannelFactory {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration, request_timeout: Duration) -> Self {
        TcpChannelFactory {
            endpoint,
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait::async_trait]
impl ChannelFactory for TcpChannelFactory {
    async fn connect(&self) -> Result<Box<dyn HttpChannel>> {
        if self.endpoint.scheme == Scheme::Https {
            return Err(TableStoreError::Protocol(
                "https endpoints require a TLS-capable channel factory".to_string(),
            ));
        }
        Ok(Box::new(TcpChannel {
            endpoint: self.endpoint.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            stream: None,
        }))
    }
}

struct TcpChannel {
    endpoint: Endpoint,
    connect_timeout: Duration,
    request_timeout: Duration,
    stream: Option<BufStream<TcpStream>>,
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

fn timed_out(what: &str) -> TableStoreError {
    TableStoreError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        what.to_string(),
    ))
}

impl TcpChannel {
    async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let address = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| timed_out("connect timed out"))??;
        stream.set_nodelay(true)?;
        self.stream = Some(BufStream::new(stream));
        Ok(())
    }

    async fn round_trip(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        self.ensure_connected().await?;
        let stream = self.stream.as_mut().expect("connected above");

        let mut head = format!("POST {} HTTP/1.1\r\n", request.path);
        head.push_str(&format!(
            "Host: {}:{}\r\n",
            self.endpoint.host, self.endpoint.port
        ));
        head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
        for (name, value) in &request.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&request.body).await?;
        stream.flush().await?;

        let mut line = String::new();
        stream.read_line(&mut line).await?;
        let status = parse_status_line(&line)?;

        let mut headers = Vec::new();
        let mut content_length: Option<usize> = None;
        let mut close = false;
        loop {
            line.clear();
            stream.read_line(&mut line).await?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TableStoreError::Protocol(format!("malformed response header: {line:?}"))
            })?;
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = Some(value.parse().map_err(|_| {
                    TableStoreError::Protocol(format!("bad content length: {value:?}"))
                })?);
            }
            if name.eq_ignore_ascii_case("transfer-encoding") {
                return Err(TableStoreError::Protocol(
                    "chunked responses are not supported".to_string(),
                ));
            }
            if name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close") {
                close = true;
            }
            headers.push((name.to_string(), value.to_string()));
        }

        let mut body = vec![0u8; content_length.unwrap_or(0)];
        stream.read_exact(&mut body).await?;

        if close {
            self.stream = None;
        }
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn parse_status_line(line: &str) -> Result<i32> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(status)) if version.starts_with("HTTP/") => status
            .parse()
            .map_err(|_| TableStoreError::Protocol(format!("bad status line: {line:?}"))),
        _ => Err(TableStoreError::Protocol(format!(
            "bad status line: {line:?}"
        ))),
    }
}

#[async_trait::async_trait]
impl HttpChannel for TcpChannel {
    async fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        let result = tokio::time::timeout(self.request_timeout, self.round_trip(request))
            .await
            .unwrap_or_else(|_| Err(timed_out("request timed out")));
        if result.is_err() {
            // Drop the stream so the next attempt reconnects cleanly.
            self.stream = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parses() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK\r\n").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.1 403 Forbidden\r\n").unwrap(), 403);
        assert!(parse_status_line("garbage").is_err());
    }
}
