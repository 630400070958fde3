//! IRC chat transport.
//!
//! Reads are framed with a line codec on the read half; a writer task owns
//! the write half and is fed through a channel, so the session loop, the
//! PING handler and the JOIN pacer can all send without sharing the socket.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use shared::config::TransportConfig;
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{debug, info, instrument, trace, warn};

use super::{ChatEvent, EventSender};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LINE_LENGTH: usize = 8 * 1024;
const OUTGOING_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport configuration: {}", .0.join("; "))]
    Config(Vec<String>),
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not read from connection: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("connection writer stopped")]
    WriterClosed,
}

/// One parsed protocol line. Message tags are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine<'a> {
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

impl<'a> IrcLine<'a> {
    /// Nickname part of the prefix (`nick!user@host`).
    #[must_use]
    pub fn nick(&self) -> Option<&'a str> {
        self.prefix
            .map(|prefix| prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }
}

/// Parses one line; `None` for blank or truncated lines.
#[must_use]
pub fn parse_line(line: &str) -> Option<IrcLine<'_>> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    if let Some(tagged) = rest.strip_prefix('@') {
        rest = tagged.split_once(' ')?.1;
    }

    let mut prefix = None;
    if let Some(prefixed) = rest.strip_prefix(':') {
        let (source, tail) = prefixed.split_once(' ')?;
        prefix = Some(source);
        rest = tail;
    }

    let rest = rest.trim_start();
    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };

    let mut words = head.split_whitespace();
    let command = words.next()?;
    let mut params: Vec<&str> = words.collect();
    params.extend(trailing);

    Some(IrcLine {
        prefix,
        command,
        params,
    })
}

/// Turns a `PRIVMSG #channel :text` line into an event. Lines without a
/// sender, a channel target or text are ignored.
#[must_use]
pub fn chat_event(line: &IrcLine<'_>, received_at: DateTime<Utc>) -> Option<ChatEvent> {
    if line.command != "PRIVMSG" {
        return None;
    }
    let user = line.nick().filter(|nick| !nick.is_empty())?;
    let target = line.params.first()?;
    let text = line.params.get(1)?;
    let channel = target.strip_prefix('#').filter(|name| !name.is_empty())?;

    Some(ChatEvent::new(user, channel, *text, received_at))
}

#[derive(Debug)]
pub struct IrcClient {
    config: TransportConfig,
}

impl IrcClient {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Connects, joins the configured channels and forwards chat lines to
    /// `events` until `shutdown` fires or the connection ends.
    ///
    /// The token is cancelled on return so a disconnect stops the rest of
    /// the pipeline.
    ///
    /// # Errors
    /// Configuration, connect and I/O failures. A clean close by the server
    /// is `Ok`.
    #[instrument(name = "transport", skip_all, fields(address = %self.config.address))]
    pub async fn run(
        self,
        events: EventSender,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let result = self.session(&events, &shutdown).await;
        if let Err(err) = &result {
            warn!(error = %err, "transport stopped");
        }
        shutdown.cancel();
        result
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let address = self.config.address.trim();
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(TransportError::Connect {
                address: address.to_string(),
                source,
            }),
            Err(_) => Err(TransportError::ConnectTimeout(address.to_string())),
        }
    }

    async fn session(
        &self,
        events: &EventSender,
        shutdown: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.config
            .validate_for_connect()
            .map_err(TransportError::Config)?;

        let stream = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            stream = self.connect() => stream?,
        };
        info!("connected");

        let (reader, writer) = stream.into_split();
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let (outgoing, queued) = mpsc::channel::<String>(OUTGOING_CAPACITY);
        let writer_task = tokio::spawn(write_lines(writer, queued));

        if !self.config.password.is_empty() {
            send(&outgoing, format!("PASS {}", self.config.password)).await?;
        }
        send(&outgoing, format!("NICK {}", self.config.nick.trim())).await?;

        let joins = shutdown.child_token();
        let mut pacer: Option<JoinHandle<()>> = None;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => break Ok(()),
                next = lines.next() => next,
            };
            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(err)) => break Err(TransportError::from(err)),
                None => {
                    info!("server closed the connection");
                    break Ok(());
                }
            };
            let Some(parsed) = parse_line(&line) else {
                continue;
            };

            match parsed.command {
                "PING" => {
                    let token = parsed.params.last().copied().unwrap_or_default();
                    if let Err(err) = send(&outgoing, format!("PONG :{token}")).await {
                        break Err(err);
                    }
                }
                "001" if pacer.is_none() => {
                    info!("registered, joining channels");
                    pacer = Some(tokio::spawn(join_channels(
                        self.config.normalized_channels(),
                        self.config.join_batch_size,
                        self.config.join_pause(),
                        outgoing.clone(),
                        joins.clone(),
                    )));
                }
                "PRIVMSG" => {
                    if let Some(event) = chat_event(&parsed, Utc::now()) {
                        if events.send(event).await.is_err() {
                            info!("event channel closed");
                            break Ok(());
                        }
                    }
                }
                "RECONNECT" => {
                    info!("server requested a reconnect");
                    break Ok(());
                }
                "NOTICE" => warn!(notice = parsed.params.last().copied().unwrap_or_default(), "server notice"),
                other => trace!(command = other, "ignored"),
            }
        };

        joins.cancel();
        if let Some(pacer) = pacer
            && let Err(err) = pacer.await
        {
            debug!(error = %err, "join task failed");
        }
        drop(outgoing);
        match writer_task.await {
            Ok(Err(err)) => debug!(error = %err, "writer ended with an error"),
            Err(err) => debug!(error = %err, "writer task failed"),
            Ok(Ok(())) => {}
        }
        outcome
    }
}

async fn send(outgoing: &mpsc::Sender<String>, line: String) -> Result<(), TransportError> {
    outgoing
        .send(line)
        .await
        .map_err(|_| TransportError::WriterClosed)
}

async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut queued: mpsc::Receiver<String>,
) -> std::io::Result<()> {
    while let Some(line) = queued.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.shutdown().await
}

/// Sends `JOIN`s in groups of `batch_size`, pausing between groups to stay
/// under the server's join rate limit.
async fn join_channels(
    channels: Vec<String>,
    batch_size: usize,
    pause: Duration,
    outgoing: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    for (index, group) in channels.chunks(batch_size.max(1)).enumerate() {
        if index > 0 {
            debug!(?pause, "pausing between join batches");
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(pause) => {}
            }
        }
        for channel in group {
            if outgoing.send(format!("JOIN #{channel}")).await.is_err() {
                return;
            }
        }
        info!(joined = group.len(), "sent join batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::event_channel;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpListener,
    };

    #[test]
    fn parses_privmsg_with_tags_and_trailing_colons() {
        let line = "@badge-info=;color=#FF0000 :alice!alice@alice.tmi.twitch.tv PRIVMSG #foo :hi :) there\r\n";
        let parsed = parse_line(line).unwrap();

        assert_eq!(parsed.command, "PRIVMSG");
        assert_eq!(parsed.nick(), Some("alice"));
        assert_eq!(parsed.params, vec!["#foo", "hi :) there"]);
    }

    #[test]
    fn parses_ping_and_numerics() {
        let ping = parse_line("PING :tmi.twitch.tv").unwrap();
        assert_eq!(ping.prefix, None);
        assert_eq!(ping.params, vec!["tmi.twitch.tv"]);

        let welcome = parse_line(":tmi.twitch.tv 001 bot :Welcome, GLHF!").unwrap();
        assert_eq!(welcome.command, "001");
        assert_eq!(welcome.params, vec!["bot", "Welcome, GLHF!"]);
    }

    #[test]
    fn blank_or_truncated_lines_are_skipped() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line(":prefix-only"), None);
        assert_eq!(parse_line("@tags-only"), None);
    }

    #[test]
    fn chat_event_requires_channel_target_and_sender() {
        let now = Utc::now();
        let event = chat_event(&parse_line(":bob!b@b PRIVMSG #Foo :yo").unwrap(), now).unwrap();
        assert_eq!((event.user.as_str(), event.channel.as_str()), ("bob", "Foo"));
        assert_eq!(event.text, "yo");

        assert!(chat_event(&parse_line(":bob!b@b PRIVMSG bot :direct").unwrap(), now).is_none());
        assert!(chat_event(&parse_line("PRIVMSG #foo :anonymous").unwrap(), now).is_none());
        assert!(chat_event(&parse_line(":bob!b@b JOIN #foo").unwrap(), now).is_none());
    }

    #[tokio::test]
    async fn invalid_config_fails_without_connecting() {
        let (sender, _receiver) = event_channel(4);
        let shutdown = CancellationToken::new();
        let err = IrcClient::new(TransportConfig::default())
            .run(sender, shutdown.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Config(_)));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn session_registers_joins_answers_ping_and_forwards_chat() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            assert_eq!(lines.next_line().await.unwrap().unwrap(), "PASS oauth:secret");
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "NICK bot");
            write.write_all(b":tmi 001 bot :Welcome\r\n").await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "JOIN #foo");
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "JOIN #bar");

            write.write_all(b"PING :tmi.twitch.tv\r\n").await.unwrap();
            assert_eq!(
                lines.next_line().await.unwrap().unwrap(),
                "PONG :tmi.twitch.tv"
            );
            write
                .write_all(b":alice!alice@alice PRIVMSG #foo :hello world\r\n")
                .await
                .unwrap();
        });

        let config = TransportConfig {
            address,
            nick: "bot".into(),
            password: "oauth:secret".into(),
            channels: vec!["#foo".into(), "bar".into()],
            join_batch_size: 1,
            join_pause_ms: 10,
            ..TransportConfig::default()
        };
        let (sender, mut receiver) = event_channel(4);
        let shutdown = CancellationToken::new();

        let result = IrcClient::new(config).run(sender, shutdown.clone()).await;
        server.await.unwrap();

        assert!(result.is_ok());
        assert!(shutdown.is_cancelled(), "disconnect must cancel the token");
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.user, "alice");
        assert_eq!(event.channel, "foo");
        assert_eq!(event.text, "hello world");
    }

    #[tokio::test]
    async fn shutdown_during_a_join_pause_stops_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            assert_eq!(lines.next_line().await.unwrap().unwrap(), "NICK bot");
            write.write_all(b":tmi 001 bot :Welcome\r\n").await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "JOIN #foo");
            stop.cancel();
            assert_eq!(lines.next_line().await.unwrap(), None, "no JOIN after shutdown");
        });

        let config = TransportConfig {
            address,
            nick: "bot".into(),
            channels: vec!["foo".into(), "bar".into()],
            join_batch_size: 1,
            join_pause_ms: 60_000,
            ..TransportConfig::default()
        };
        let (sender, _receiver) = event_channel(4);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            IrcClient::new(config).run(sender, shutdown),
        )
        .await
        .expect("session must not wait out the join pause");

        assert!(result.is_ok());
        server.await.unwrap();
    }
}
