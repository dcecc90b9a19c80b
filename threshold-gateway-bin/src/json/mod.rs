//! JSON listener for receiving log events.
//!
//! Events arrive over UDP (one JSON object per datagram) and TCP (relaxed JSON Lines,
//! see [`json_lines`]). Field names follow logstash conventions, and the `@`-prefixed
//! names of compact log event format (CLEF) are accepted too, so Serilog or Seq style
//! producers can send here directly.

use chrono::{DateTime, TimeZone, Utc};
use conf::Conf;
use serde::Deserialize;
use std::{io, net::SocketAddr};
use threshold_gateway::{Level, LogEvent};
use tokio::{
    io::AsyncRead,
    net::{TcpListener, UdpSocket},
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
};
use tracing::{debug, error, info, trace};

mod json_lines;
use json_lines::JsonLinesReader;

/// Configuration for the JSON log event listener.
#[derive(Clone, Conf, Debug)]
#[conf(serde)]
pub struct JsonConfig {
    /// Socket address to listen for JSON log events.
    /// Both UDP and TCP listeners are started on this address.
    ///
    /// - **UDP**: Each datagram should contain a single JSON object.
    /// - **TCP**: Objects separated by newlines. Newlines inside an object are allowed.
    ///
    /// See [`JsonLogEvent`] for the accepted field names.
    #[conf(long, env)]
    pub listen_addr: SocketAddr,
}

impl JsonConfig {
    /// Bind UDP and TCP sockets and start background tasks that forward parsed
    /// events to `events_tx`.
    pub async fn start_tasks(
        &self,
        events_tx: UnboundedSender<LogEvent>,
    ) -> io::Result<(JoinHandle<()>, JoinHandle<()>)> {
        let udp_handle = self.start_udp_task(events_tx.clone()).await?;
        let tcp_handle = self.start_tcp_task(events_tx).await?;
        Ok((udp_handle, tcp_handle))
    }

    async fn start_udp_task(
        &self,
        events_tx: UnboundedSender<LogEvent>,
    ) -> io::Result<JoinHandle<()>> {
        let udp_socket = UdpSocket::bind(self.listen_addr).await?;
        info!("Listening for JSON UDP on {}", self.listen_addr);

        Ok(tokio::task::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let Ok((len, addr)) = udp_socket
                    .recv_from(&mut buf)
                    .await
                    .inspect_err(|err| error!("Error receiving UDP packet: {err}"))
                else {
                    continue;
                };

                let Ok(event) = parse_event(&buf[..len])
                    .inspect_err(|err| error!("Dropping UDP packet from {addr}: {err}"))
                else {
                    continue;
                };

                if events_tx.send(event).is_err() {
                    debug!("Gateway is gone, stopping JSON UDP listener");
                    return;
                }
            }
        }))
    }

    async fn start_tcp_task(
        &self,
        events_tx: UnboundedSender<LogEvent>,
    ) -> io::Result<JoinHandle<()>> {
        let tcp_listener = TcpListener::bind(self.listen_addr).await?;
        info!("Listening for JSON TCP on {}", self.listen_addr);

        Ok(tokio::task::spawn(async move {
            loop {
                let Ok((stream, addr)) = tcp_listener
                    .accept()
                    .await
                    .inspect_err(|err| error!("Error accepting JSON TCP connection: {err}"))
                else {
                    continue;
                };
                trace!("Accepted JSON TCP connection from {addr}");

                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    match forward_events(stream, &events_tx).await {
                        Ok(count) => {
                            trace!("JSON TCP connection from {addr} closed after {count} events")
                        }
                        Err(err) => error!("JSON TCP connection from {addr} error: {err}"),
                    }
                });
            }
        }))
    }
}

/// Parse one JSON log event from raw bytes.
fn parse_event(bytes: &[u8]) -> io::Result<LogEvent> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let json_event: JsonLogEvent = serde_json::from_str(text)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(json_event.into_log_event())
}

/// Read events from a stream until EOF, forwarding each to `events_tx`.
///
/// Returns the number of events forwarded. The first malformed value ends the
/// stream with an error, since framing can't be trusted after that.
async fn forward_events<R>(
    stream: R,
    events_tx: &UnboundedSender<LogEvent>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut reader = JsonLinesReader::new(stream);
    let mut count = 0;
    while let Some(bytes) = reader.next_value().await? {
        let event = parse_event(&bytes)?;
        if events_tx.send(event).is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gateway is gone"));
        }
        count += 1;
    }
    Ok(count)
}

/// A JSON log event.
///
/// Only the message is required. Unknown fields are ignored.
///
/// * `message`, `msg`, `@m`: the rendered message
/// * `timestamp`, `time`, `@timestamp`, `@t`: a unix timestamp (integer, float, or
///   either as a string) or an RFC3339 string. If absent, the time of arrival is used.
/// * `level`, `severity`, `@l`: the level name. Absent or unknown means info.
/// * `event_type`, `@i`: an integer, or a hex string as CLEF event ids are written
/// * `hostname`, `host`: the originating host
/// * `appname`, `app`, `application`, `service`: the originating program
#[non_exhaustive]
#[derive(Debug, Deserialize)]
pub struct JsonLogEvent {
    /// The rendered message text
    #[serde(alias = "msg", alias = "@m")]
    pub message: String,

    /// Level name, None if absent or not recognized
    #[serde(
        default,
        alias = "severity",
        alias = "@l",
        deserialize_with = "deserialize_opt_level"
    )]
    pub level: Option<Level>,

    /// When the event happened, according to its producer
    #[serde(
        default,
        alias = "time",
        alias = "@timestamp",
        alias = "@t",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    /// Event type, usually a hash of the message template
    #[serde(default, alias = "@i", deserialize_with = "deserialize_event_type")]
    pub event_type: Option<u32>,

    /// Hostname
    #[serde(alias = "host")]
    pub hostname: Option<String>,

    /// Application name
    #[serde(alias = "app", alias = "application", alias = "service")]
    pub appname: Option<String>,
}

impl JsonLogEvent {
    /// Convert to a LogEvent. Without a timestamp, the time of arrival is used.
    pub fn into_log_event(self) -> LogEvent {
        let mut builder = LogEvent::builder(self.level.unwrap_or(Level::INFO), self.message);
        if let Some(ts) = self.timestamp {
            builder = builder.timestamp(ts);
        }
        if let Some(event_type) = self.event_type {
            builder = builder.event_type(event_type);
        }
        if let Some(hostname) = self.hostname {
            builder = builder.hostname(hostname);
        }
        if let Some(appname) = self.appname {
            builder = builder.appname(appname);
        }
        builder.build()
    }
}

/// Deserialize an optional log level, returning None for unknown values.
fn deserialize_opt_level<'de, D>(deserializer: D) -> Result<Option<Level>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| Level::parse(&s)))
}

fn from_unix_secs(secs: f64) -> Option<DateTime<Utc>> {
    // Floor so that pre-1970 fractions land in the earlier second
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1_000_000_000.0) as u32).min(999_999_999);
    let whole_secs = whole as i64;
    Utc.timestamp_opt(whole_secs, nanos).single()
}

/// Deserialize a timestamp from a unix timestamp (number or string) or an RFC3339 string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimestampValue {
        Integer(i64),
        Float(f64),
        String(String),
    }

    let opt: Option<TimestampValue> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(TimestampValue::Integer(secs)) => Ok(Utc.timestamp_opt(secs, 0).single()),
        Some(TimestampValue::Float(secs)) => Ok(from_unix_secs(secs)),
        Some(TimestampValue::String(s)) => {
            if let Ok(secs) = s.parse::<i64>() {
                return Ok(Utc.timestamp_opt(secs, 0).single());
            }
            if let Ok(secs) = s.parse::<f64>() {
                return Ok(from_unix_secs(secs));
            }
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| D::Error::custom(format!("invalid timestamp '{s}': {e}")))
        }
    }
}

/// Deserialize an event type from an integer, or from a hex string with or without `0x`.
fn deserialize_event_type<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EventTypeValue {
        Integer(u32),
        String(String),
    }

    let opt: Option<EventTypeValue> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(EventTypeValue::Integer(n)) => Ok(Some(n)),
        Some(EventTypeValue::String(s)) => {
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(&s);
            u32::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid event type '{s}': {e}")))
        }
    }
}
