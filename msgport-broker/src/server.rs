//! UDS server: accept loop, channel lifecycle, and the broker event loop.
//!
//! Every connection announces its role with a hello message and is attached
//! to the client identified by its socket peer credentials. Request channels
//! get a read task that locates frames with the stateless scan and hands them
//! to the broker loop one at a time; the reverse channel is kept for writing
//! deliveries. All registry mutations and reverse-channel writes happen on
//! the single broker loop, so no locking is needed around broker state.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use msgport_platform::{AppId, IdentityService, PackageManager, PlatformError};
use msgport_wire::{find_next, ErrorCode, Frame, Hello};

use crate::registry::ClientId;
use crate::service::{MessagePortService, Outbound};

/// Fixed server name; the socket path is `<socket_dir>/<SERVER_NAME>`.
pub const SERVER_NAME: &str = "message-port-server";

/// Default directory holding the broker socket.
pub const DEFAULT_SOCKET_DIR: &str = "/run/messageportd";

/// Scratch buffer size for request-channel reads.
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub socket_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

type ChannelId = u64;

enum ServerEvent {
    Request {
        client: ClientId,
        frame: Frame,
        reply: oneshot::Sender<i32>,
    },
    ChannelClosed {
        client: ClientId,
        channel: ChannelId,
    },
}

struct ClientRecord {
    app_id: AppId,
    channels: HashSet<ChannelId>,
    reverse: Option<UnixStream>,
}

/// The message-port broker: a bound listening socket plus the event loop
/// state behind it.
pub struct Broker {
    listener: UnixListener,
    socket_path: PathBuf,
    core: BrokerCore,
}

impl Broker {
    /// Bind the listening socket. Failure here is fatal to the daemon.
    ///
    /// Creates the socket directory (mode `0755`) if needed, unlinks any
    /// stale socket from a previous run, and opens the socket world-writable
    /// (mode `0666`) so any application may connect; identity comes from
    /// peer credentials, not filesystem permissions.
    pub fn bind(
        config: &BrokerConfig,
        identity: Arc<dyn IdentityService>,
        packages: Arc<dyn PackageManager>,
    ) -> Result<Self, BrokerError> {
        let socket_path = config.socket_dir.join(SERVER_NAME);

        std::fs::create_dir_all(&config.socket_dir)?;
        std::fs::set_permissions(&config.socket_dir, std::fs::Permissions::from_mode(0o755))?;
        if let Err(err) = std::fs::remove_file(&socket_path) {
            if err.kind() != io::ErrorKind::NotFound {
                return Err(err.into());
            }
        }

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o666))?;

        tracing::info!("listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
            core: BrokerCore::new(identity, packages),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections and dispatch events; never returns under normal
    /// operation. Accept and hello failures are logged and the loop
    /// continues.
    pub async fn run(mut self) -> Result<(), BrokerError> {
        loop {
            tokio::select! {
                // Admit pending connections before dispatching requests, so
                // a client's reverse channel is attached before any frame it
                // sent afterwards is handled.
                biased;

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Err(err) = self.core.accept_channel(stream).await {
                            tracing::warn!("rejecting connection: {err}");
                        }
                    }
                    Err(err) => tracing::warn!("accept failed: {err}"),
                },
                Some(event) = self.core.event_rx.recv() => {
                    self.core.handle_event(event).await;
                }
            }
        }
    }
}

/// Broker state shared by the accept loop and the event handlers.
struct BrokerCore {
    identity: Arc<dyn IdentityService>,
    service: MessagePortService,
    clients: HashMap<ClientId, ClientRecord>,
    next_channel: ChannelId,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl BrokerCore {
    fn new(identity: Arc<dyn IdentityService>, packages: Arc<dyn PackageManager>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            identity,
            service: MessagePortService::new(packages),
            clients: HashMap::new(),
            next_channel: 0,
            event_tx,
            event_rx,
        }
    }

    /// Read the hello message and peer credentials of a freshly accepted
    /// connection, then attach it to its client.
    async fn accept_channel(&mut self, mut stream: UnixStream) -> Result<(), BrokerError> {
        let mut hello = [0u8; Hello::LEN];
        stream.read_exact(&mut hello).await?;
        let hello = Hello::decode(hello);

        let creds = stream.peer_cred()?;
        let pid = creds
            .pid()
            .ok_or_else(|| io::Error::other("peer credentials carry no pid"))?;

        self.admit(stream, pid, hello)
    }

    /// Attach an established channel to the client identified by `pid`,
    /// creating the client record on its first connection.
    fn admit(&mut self, stream: UnixStream, pid: ClientId, hello: Hello) -> Result<(), BrokerError> {
        let record = match self.clients.entry(pid) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let app_id = self.identity.app_id_for_pid(pid)?;
                tracing::info!("client {pid} connected as {app_id}");
                entry.insert(ClientRecord {
                    app_id,
                    channels: HashSet::new(),
                    reverse: None,
                })
            }
        };

        if hello.reverse {
            // A new reverse channel replaces any previous one.
            record.reverse = Some(stream);
        } else {
            let channel = self.next_channel;
            self.next_channel += 1;
            record.channels.insert(channel);
            tokio::spawn(run_request_channel(
                stream,
                pid,
                channel,
                self.event_tx.clone(),
            ));
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Request {
                client,
                frame,
                reply,
            } => {
                let status = self.handle_request(client, frame).await;
                let _ = reply.send(status);
            }
            ServerEvent::ChannelClosed { client, channel } => {
                self.channel_closed(client, channel);
            }
        }
    }

    async fn handle_request(&mut self, client: ClientId, frame: Frame) -> i32 {
        let Some(record) = self.clients.get(&client) else {
            return ErrorCode::InvalidParameter.as_status();
        };
        let client_app = record.app_id.clone();

        match frame {
            Frame::RegisterPort { bundle } => self
                .service
                .register_port(client, &client_app, &bundle)
                .as_status(),
            Frame::CheckRemotePort { bundle } => self
                .service
                .check_remote_port(&client_app, &bundle)
                .as_status(),
            Frame::SendMessage { metadata, payload } => {
                match self.service.send_message(&client_app, &metadata, &payload) {
                    Ok(outbound) => self.deliver(outbound).await.as_status(),
                    Err(code) => code.as_status(),
                }
            }
            other => {
                tracing::warn!("unexpected {:?} frame on request channel", other.kind());
                ErrorCode::InvalidParameter.as_status()
            }
        }
    }

    /// Write a delivery on the destination's reverse channel.
    ///
    /// Runs on the broker loop, so writes to one client never interleave.
    /// `write_all` retries partial writes until the frame is drained.
    async fn deliver(&mut self, outbound: Outbound) -> ErrorCode {
        let Some(record) = self.clients.get_mut(&outbound.client) else {
            return ErrorCode::IoError;
        };
        let Some(reverse) = record.reverse.as_mut() else {
            tracing::warn!("client {} has no reverse channel", outbound.client);
            return ErrorCode::IoError;
        };

        let frame = Frame::DeliverMessage {
            metadata: outbound.metadata,
            payload: outbound.payload,
        };
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("failed to encode delivery: {err}");
                return ErrorCode::IoError;
            }
        };

        if let Err(err) = reverse.write_all(&bytes).await {
            tracing::warn!("delivery to client {} failed: {err}", outbound.client);
            record.reverse = None;
            return ErrorCode::IoError;
        }
        ErrorCode::None
    }

    fn channel_closed(&mut self, client: ClientId, channel: ChannelId) {
        let Some(record) = self.clients.get_mut(&client) else {
            return;
        };
        record.channels.remove(&channel);
        if record.channels.is_empty() {
            tracing::info!("all request channels of client {client} closed; destroying client");
            self.clients.remove(&client);
            self.service.unregister_client(client);
        }
    }
}

/// Read loop for one request channel.
///
/// Reads go through a bounded scratch buffer into the channel's pending
/// buffer; the combined bytes are scanned with `find_next`, and each complete
/// frame is dispatched and answered in order before the next is scanned.
/// The channel is reported closed only after this loop returns, never from
/// inside a dispatch.
async fn run_request_channel(
    mut stream: UnixStream,
    client: ClientId,
    channel: ChannelId,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut scratch = [0u8; READ_CHUNK];
    let mut pending = BytesMut::new();

    'read: loop {
        let read = match stream.read(&mut scratch).await {
            Ok(0) => break 'read,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!("request channel of client {client} read failed: {err}");
                break 'read;
            }
        };
        pending.extend_from_slice(&scratch[..read]);

        while let Some(end) = find_next(&pending) {
            let bytes = pending.split_to(end);
            let frame = match Frame::decode(&bytes) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!("dropping request channel of client {client}: {err}");
                    break 'read;
                }
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            let event = ServerEvent::Request {
                client,
                frame,
                reply: reply_tx,
            };
            if event_tx.send(event).is_err() {
                break 'read;
            }
            let status = match reply_rx.await {
                Ok(status) => status,
                Err(_) => break 'read,
            };

            let reply = Frame::Reply { status };
            let Ok(bytes) = reply.to_bytes() else {
                break 'read;
            };
            if stream.write_all(&bytes).await.is_err() {
                break 'read;
            }
        }
    }

    let _ = event_tx.send(ServerEvent::ChannelClosed { client, channel });
}
