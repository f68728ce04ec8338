//! Distributed Social Protocol client over TCP.
//!
//! Every operation opens a connection, sends `join` to obtain a session token, then issues one
//! `directmessage` request. Frames are single-line JSON terminated by `\r\n`. The whole exchange
//! is bounded by the configured timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::{Credentials, Transport};
use crate::config::ServerConfig;
use crate::conversation::{Message, RawTimestamp};
use crate::error::TransportError;

#[derive(Serialize)]
struct JoinRequest<'a> {
    join: JoinBody<'a>,
}

#[derive(Serialize)]
struct JoinBody<'a> {
    username: &'a str,
    password: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct DirectMessageRequest<'a> {
    token: &'a str,
    directmessage: DirectMessageBody<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum DirectMessageBody<'a> {
    Send {
        entry: &'a str,
        recipient: &'a str,
        timestamp: String,
    },
    /// "new" or "all".
    Fetch(&'a str),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: ServerResponse,
}

#[derive(Debug, Deserialize)]
struct ServerResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    message: String,
    from: String,
    timestamp: RawTimestamp,
}

/// Map wire messages to messages addressed to `owner`, dropping ones without a usable timestamp.
fn into_messages(wire: Vec<WireMessage>, owner: &str) -> Vec<Message> {
    wire.into_iter()
        .filter_map(|m| match m.timestamp.seconds() {
            Some(ts) => Some(Message::new(m.from, owner, m.message, ts)),
            None => {
                log::warn!("dsp: dropping message from {} with bad timestamp {:?}", m.from, m.timestamp);
                None
            }
        })
        .collect()
}

/// TCP client for a DSP server.
#[derive(Debug, Clone)]
pub struct DspTransport {
    addr: String,
    timeout: Duration,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn request<T: Serialize>(&mut self, req: &T) -> Result<ServerResponse, TransportError> {
        let mut line = serde_json::to_string(req).map_err(|e| TransportError::Protocol(e.to_string()))?;
        line.push_str("\r\n");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(TransportError::Protocol("connection closed by server".to_string()));
        }
        let envelope: Envelope = serde_json::from_str(reply.trim())
            .map_err(|e| TransportError::Protocol(format!("{}: {}", e, reply.trim())))?;
        let res = envelope.response;
        if res.kind != "ok" {
            return Err(TransportError::Rejected(
                res.message.unwrap_or_else(|| res.kind.clone()),
            ));
        }
        Ok(res)
    }
}

impl DspTransport {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host.trim(), port),
            timeout,
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        Self::new(&server.host, server.port, Duration::from_millis(server.timeout_ms))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connect and join; returns the connection and the session token.
    async fn join(&self, credentials: &Credentials) -> Result<(Connection, String), TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (read, writer) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(read),
            writer,
        };
        let res = conn
            .request(&JoinRequest {
                join: JoinBody {
                    username: &credentials.username,
                    password: &credentials.password,
                    token: "",
                },
            })
            .await?;
        let token = res
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TransportError::Protocol("join response without token".to_string()))?;
        Ok((conn, token))
    }

    async fn fetch(&self, credentials: &Credentials, which: &str) -> Result<Vec<Message>, TransportError> {
        let exchange = async {
            let (mut conn, token) = self.join(credentials).await?;
            let res = conn
                .request(&DirectMessageRequest {
                    token: &token,
                    directmessage: DirectMessageBody::Fetch(which),
                })
                .await?;
            Ok::<_, TransportError>(into_messages(res.messages, &credentials.username))
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl Transport for DspTransport {
    async fn send(&self, credentials: &Credentials, message: &Message) -> Result<(), TransportError> {
        let exchange = async {
            let (mut conn, token) = self.join(credentials).await?;
            conn.request(&DirectMessageRequest {
                token: &token,
                directmessage: DirectMessageBody::Send {
                    entry: &message.body,
                    recipient: &message.recipient,
                    timestamp: message.timestamp.to_string(),
                },
            })
            .await?;
            log::debug!("dsp: delivered message to {}", message.recipient);
            Ok::<_, TransportError>(())
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }

    async fn retrieve_new(&self, credentials: &Credentials) -> Result<Vec<Message>, TransportError> {
        self.fetch(credentials, "new").await
    }

    async fn retrieve_all(&self, credentials: &Credentials) -> Result<Vec<Message>, TransportError> {
        self.fetch(credentials, "all").await
    }
}
