//! Multicast discovery of workers on the local segment
//!
//! Workers announce a service record on a UDP multicast group and answer
//! queries; clients send one query and collect announcements for a fixed
//! window. Datagrams are JSON objects `{kind, service, properties}` with
//! `kind` one of `announce`, `withdraw`, `query`.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jm_protocol::WorkerCall;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::transport::{RpcClient, Security};
use crate::types::EndpointId;

/// Service type every worker registers under
pub const SERVICE_TYPE: &str = "_jobmesh._tcp.local.";

/// Longest instance name (the part before the service type), in bytes
pub const MAX_INSTANCE_LEN: usize = 63;

const MAX_PACKET_SIZE: usize = 4096;

/// Kind of a discovery datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatagramKind {
    /// A worker is (still) present
    Announce,
    /// A worker went away
    Withdraw,
    /// A client asks every worker to announce now
    Query,
}

/// One discovery datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    /// What this datagram means
    pub kind: DatagramKind,
    /// Full service name (empty for queries)
    #[serde(default)]
    pub service: String,
    /// Property bag (empty for queries and withdrawals)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Datagram {
    fn query() -> Self {
        Self {
            kind: DatagramKind::Query,
            service: String::new(),
            properties: BTreeMap::new(),
        }
    }
}

/// Typed view of the announced property bag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProperties {
    /// Host name of the worker
    pub host: String,
    /// Address of the worker
    pub ip: String,
    /// Worker id (`ip:port:start_timestamp`)
    pub id: String,
    /// Process id
    pub pid: u32,
    /// RPC port
    pub port: u16,
    /// Whether the RPC port speaks TLS
    pub ssl: bool,
    /// Job path
    pub path: String,
}

impl ServiceProperties {
    /// Encode as a string property bag
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("host".to_string(), self.host.clone()),
            ("ip".to_string(), self.ip.clone()),
            ("id".to_string(), self.id.clone()),
            ("pid".to_string(), self.pid.to_string()),
            ("port".to_string(), self.port.to_string()),
            ("ssl".to_string(), self.ssl.to_string()),
            ("path".to_string(), self.path.clone()),
        ])
    }

    /// Decode a property bag, `None` when a key is missing or unparsable
    pub fn from_map(map: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            host: map.get("host")?.clone(),
            ip: map.get("ip")?.clone(),
            id: map.get("id")?.clone(),
            pid: map.get("pid")?.parse().ok()?,
            port: map.get("port")?.parse().ok()?,
            ssl: map.get("ssl")?.parse().ok()?,
            path: map.get("path")?.clone(),
        })
    }

    /// Endpoint the worker answers on
    pub fn endpoint(&self) -> EndpointId {
        EndpointId::new(self.ip.clone(), self.port)
    }
}

/// A worker's announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Full service name
    pub service: String,
    /// Announced properties
    pub properties: ServiceProperties,
}

impl Announcement {
    /// Announcement with the service name derived from the properties
    pub fn new(short_host: &str, properties: ServiceProperties) -> Self {
        Self {
            service: service_name(&properties.path, short_host, properties.port),
            properties,
        }
    }

    fn datagram(&self, kind: DatagramKind) -> Datagram {
        let properties = match kind {
            DatagramKind::Announce => self.properties.to_map(),
            _ => BTreeMap::new(),
        };
        Datagram {
            kind,
            service: self.service.clone(),
            properties,
        }
    }
}

/// Build `<job>@<host>:<port>.<SERVICE_TYPE>`
///
/// The job part is the basename of `path` with dots replaced, cut so the
/// instance name fits [`MAX_INSTANCE_LEN`] bytes. The `@host:port` suffix is
/// never cut.
pub fn service_name(path: &str, short_host: &str, port: u16) -> String {
    let base = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .replace('.', "_");
    let suffix = format!("@{}:{}", short_host, port);

    let budget = MAX_INSTANCE_LEN.saturating_sub(suffix.len());
    let mut end = base.len().min(budget);
    while !base.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}.{}", &base[..end], suffix, SERVICE_TYPE)
}

/// Socket bound to the discovery port and joined to the group
fn multicast_socket(config: &DiscoveryConfig) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // Several workers on one machine share the port
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;

    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port).into())?;
    socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_multicast_ttl_v4(1)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

async fn send(
    socket: &UdpSocket,
    config: &DiscoveryConfig,
    datagram: &Datagram,
) -> Result<(), DiscoveryError> {
    let data = serde_json::to_vec(datagram)?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(DiscoveryError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "datagram too large",
        )));
    }
    socket
        .send_to(&data, SocketAddrV4::new(config.group, config.port))
        .await?;
    Ok(())
}

struct ActiveAnnouncement {
    announcement: Announcement,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
}

/// Announces one worker and withdraws it again
pub struct Announcer {
    config: DiscoveryConfig,
    active: Mutex<Option<ActiveAnnouncement>>,
}

impl Announcer {
    /// Create an announcer that has not announced anything
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Whether an announcement is active
    pub fn is_announced(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Start announcing, replacing any earlier announcement
    ///
    /// The record is re-announced periodically and on every query until
    /// [`withdraw`](Self::withdraw) is called.
    pub async fn announce(&self, announcement: Announcement) -> Result<(), DiscoveryError> {
        self.withdraw().await;

        let socket = Arc::new(multicast_socket(&self.config)?);
        send(&socket, &self.config, &announcement.datagram(DatagramKind::Announce)).await?;

        let cancel = CancellationToken::new();
        tokio::spawn(announce_loop(
            self.config.clone(),
            Arc::clone(&socket),
            announcement.datagram(DatagramKind::Announce),
            cancel.clone(),
        ));

        tracing::info!("Announced {}", announcement.service);
        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveAnnouncement {
                announcement,
                socket,
                cancel,
            });
        }
        Ok(())
    }

    /// Withdraw the active announcement, if any
    ///
    /// Idempotent: without an active announcement nothing is sent.
    pub async fn withdraw(&self) {
        let active = match self.active.lock() {
            Ok(mut active) => active.take(),
            Err(_) => None,
        };
        let Some(active) = active else {
            return;
        };

        active.cancel.cancel();
        let datagram = active.announcement.datagram(DatagramKind::Withdraw);
        match send(&active.socket, &self.config, &datagram).await {
            Ok(()) => tracing::info!("Withdrew {}", active.announcement.service),
            Err(e) => tracing::warn!("Failed to withdraw {}: {}", active.announcement.service, e),
        }
    }
}

async fn announce_loop(
    config: DiscoveryConfig,
    socket: Arc<UdpSocket>,
    datagram: Datagram,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.announce_interval);
    ticker.tick().await;
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            received = socket.recv_from(&mut buf) => {
                let Ok((n, _)) = received else { continue };
                match serde_json::from_slice::<Datagram>(&buf[..n]) {
                    Ok(d) if d.kind == DatagramKind::Query => {}
                    _ => continue,
                }
            }
        }

        if let Err(e) = send(&socket, &config, &datagram).await {
            tracing::debug!("Re-announcement of {} failed: {}", datagram.service, e);
        }
    }
}

/// Apply one received datagram to the table of announced services
pub fn apply_datagram(table: &mut BTreeMap<String, Announcement>, datagram: Datagram) {
    match datagram.kind {
        DatagramKind::Announce => match ServiceProperties::from_map(&datagram.properties) {
            Some(properties) => {
                table.insert(
                    datagram.service.clone(),
                    Announcement {
                        service: datagram.service,
                        properties,
                    },
                );
            }
            None => tracing::debug!("Ignoring incomplete announcement of {}", datagram.service),
        },
        DatagramKind::Withdraw => {
            if table.remove(&datagram.service).is_some() {
                tracing::debug!("{} withdrawn", datagram.service);
            }
        }
        DatagramKind::Query => {}
    }
}

/// Enumerate announced workers for `window`, keeping those that answer
///
/// Each announced worker is confirmed with a `pid` call; workers that do not
/// answer, or answer with another pid, are dropped without retry.
pub async fn enumerate(
    config: &DiscoveryConfig,
    client: &RpcClient,
    window: Duration,
) -> Result<BTreeMap<String, Announcement>, DiscoveryError> {
    let socket = multicast_socket(config)?;
    send(&socket, config, &Datagram::query()).await?;

    let mut table = BTreeMap::new();
    let deadline = Instant::now() + window;
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (n, from) = match received {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::debug!("Discovery receive failed: {}", e);
                continue;
            }
            Ok(Ok(received)) => received,
        };
        match serde_json::from_slice::<Datagram>(&buf[..n]) {
            Ok(datagram) => apply_datagram(&mut table, datagram),
            Err(e) => tracing::debug!("Ignoring malformed datagram from {}: {}", from, e),
        }
    }

    let checks = table.into_values().map(|announcement| async move {
        let endpoint = announcement.properties.endpoint();
        let security = Security::from_ssl(announcement.properties.ssl);
        match client
            .call_as::<u32, _>(&endpoint, security, &WorkerCall::Pid)
            .await
        {
            Ok(pid) if pid == announcement.properties.pid => Some(announcement),
            Ok(pid) => {
                tracing::info!(
                    "{} answered with pid {} instead of {}, dropping",
                    announcement.service,
                    pid,
                    announcement.properties.pid
                );
                None
            }
            Err(e) => {
                tracing::info!("{}: connection refused ({})", announcement.service, e);
                None
            }
        }
    });

    Ok(futures::future::join_all(checks)
        .await
        .into_iter()
        .flatten()
        .map(|a| (a.service.clone(), a))
        .collect())
}
