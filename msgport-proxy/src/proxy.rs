//! The client proxy: request/reverse channels and the public API.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use msgport_platform::{AppId, CertMatch, PackageManager};
use msgport_wire::{flag, keys, Bundle, ErrorCode, Frame, FrameCodec, Hello, MAX_MESSAGE_SIZE};

use crate::error::ProxyError;
use crate::tables::{DeliveredMessage, MessageCallback, PortId, PortTables};

/// Transport ceiling for the proxy's framed channels. Well above the
/// 8 KiB message limit; only guards against a runaway peer.
const CHANNEL_MAX_FRAME: u32 = 64 * 1024;

#[derive(Clone)]
pub struct ProxyConfig {
    /// Path of the broker socket.
    pub socket_path: PathBuf,
    /// This application's canonical identifier.
    pub app_id: AppId,
    /// Package information for client-side trust pre-checks.
    pub packages: Arc<dyn PackageManager>,
}

/// A connected message-port client.
///
/// Construct one per process at first use and keep it for the process
/// lifetime; the broker garbage-collects its registrations when the last
/// channel closes.
pub struct MessagePortProxy {
    app_id: AppId,
    packages: Arc<dyn PackageManager>,
    request: tokio::sync::Mutex<Framed<UnixStream, FrameCodec>>,
    tables: Arc<Mutex<PortTables>>,
    reverse_task: JoinHandle<()>,
}

impl MessagePortProxy {
    /// Open the request and reverse channels to the broker and start the
    /// delivery task.
    pub async fn connect(config: ProxyConfig) -> Result<Self, ProxyError> {
        let mut request = UnixStream::connect(&config.socket_path).await?;
        request
            .write_all(&Hello { reverse: false }.encode())
            .await?;

        let mut reverse = UnixStream::connect(&config.socket_path).await?;
        reverse.write_all(&Hello { reverse: true }.encode()).await?;

        let tables = Arc::new(Mutex::new(PortTables::default()));
        let reverse_task = tokio::spawn(run_reverse_channel(
            Framed::new(reverse, FrameCodec::new(CHANNEL_MAX_FRAME)),
            tables.clone(),
        ));

        Ok(Self {
            app_id: config.app_id,
            packages: config.packages,
            request: tokio::sync::Mutex::new(Framed::new(
                request,
                FrameCodec::new(CHANNEL_MAX_FRAME),
            )),
            tables,
            reverse_task,
        })
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Register a local port and bind `callback` to it.
    ///
    /// Re-registering an existing `(name, trusted)` pair replaces the
    /// callback and returns the existing identifier without a broker round
    /// trip. The same name in the other namespace is a distinct port.
    pub async fn register_port(
        &self,
        name: &str,
        trusted: bool,
        callback: MessageCallback,
    ) -> Result<PortId, ProxyError> {
        let existing = lock_tables(&self.tables).existing_id(name, trusted);
        if let Some(id) = existing {
            lock_tables(&self.tables).set_callback(name, trusted, callback);
            return Ok(id);
        }

        let mut bundle = Bundle::new();
        bundle.insert(keys::LOCAL_APPID, self.app_id.as_str());
        bundle.insert(keys::LOCAL_PORT, name);
        bundle.insert(keys::TRUSTED_LOCAL, flag(trusted));

        let code = self.request(Frame::RegisterPort { bundle }).await?;
        if !code.is_ok() {
            return Err(ProxyError::Broker(code));
        }

        Ok(lock_tables(&self.tables).insert(name, trusted, callback))
    }

    /// Ask the broker whether a remote port exists.
    ///
    /// Trusted lookups run the preload/certificate pre-check locally before
    /// asking; the broker re-checks authoritatively.
    pub async fn check_remote_port(
        &self,
        remote_app: &AppId,
        remote_port: &str,
        trusted: bool,
    ) -> Result<bool, ProxyError> {
        if trusted {
            self.precheck_trust(remote_app)?;
        }

        let mut bundle = Bundle::new();
        bundle.insert(keys::REMOTE_APPID, remote_app.as_str());
        bundle.insert(keys::REMOTE_PORT, remote_port);
        bundle.insert(keys::TRUSTED_REMOTE, flag(trusted));

        match self.request(Frame::CheckRemotePort { bundle }).await? {
            ErrorCode::None => Ok(true),
            ErrorCode::MessageportNotFound => Ok(false),
            other => Err(ProxyError::Broker(other)),
        }
    }

    /// Send a unidirectional message to a remote port.
    pub async fn send_message(
        &self,
        remote_app: &AppId,
        remote_port: &str,
        trusted_message: bool,
        payload: Bundle,
    ) -> Result<(), ProxyError> {
        if trusted_message {
            self.precheck_trust(remote_app)?;
        }

        let mut metadata = Bundle::new();
        metadata.insert(keys::MESSAGE_TYPE, keys::UNI_DIR);
        metadata.insert(keys::REMOTE_APPID, remote_app.as_str());
        metadata.insert(keys::REMOTE_PORT, remote_port);
        metadata.insert(keys::TRUSTED_MESSAGE, flag(trusted_message));

        self.send_internal(metadata, payload).await
    }

    /// Send a bidirectional message, announcing `local_port` as the reply
    /// port on this side.
    pub async fn send_bidir_message(
        &self,
        local_port: &str,
        trusted_port: bool,
        remote_app: &AppId,
        remote_port: &str,
        trusted_message: bool,
        payload: Bundle,
    ) -> Result<(), ProxyError> {
        if trusted_message {
            self.precheck_trust(remote_app)?;
        }

        let mut metadata = Bundle::new();
        metadata.insert(keys::MESSAGE_TYPE, keys::BI_DIR);
        metadata.insert(keys::LOCAL_APPID, self.app_id.as_str());
        metadata.insert(keys::LOCAL_PORT, local_port);
        metadata.insert(keys::TRUSTED_LOCAL, flag(trusted_port));
        metadata.insert(keys::REMOTE_APPID, remote_app.as_str());
        metadata.insert(keys::REMOTE_PORT, remote_port);
        metadata.insert(keys::TRUSTED_MESSAGE, flag(trusted_message));

        self.send_internal(metadata, payload).await
    }

    /// Name of a locally registered port.
    pub fn local_port_name(&self, id: PortId) -> Option<String> {
        lock_tables(&self.tables)
            .name_of(id)
            .map(|(name, _)| name.to_string())
    }

    /// Whether a locally registered port is in the trusted namespace.
    pub fn is_trusted_local_port(&self, id: PortId) -> Result<bool, ProxyError> {
        lock_tables(&self.tables)
            .name_of(id)
            .map(|(_, trusted)| trusted)
            .ok_or(ProxyError::UnknownPort(id))
    }

    /// Enforce the size ceiling on the merged envelope, then hand the frame
    /// to the broker.
    async fn send_internal(&self, metadata: Bundle, payload: Bundle) -> Result<(), ProxyError> {
        let mut merged = payload.clone();
        merged.merge_from(&metadata);
        let size = merged.encode()?.len();
        if size > MAX_MESSAGE_SIZE {
            tracing::error!("message of {size} bytes exceeds the maximum");
            return Err(ProxyError::MaxExceeded { size });
        }

        let code = self.request(Frame::SendMessage { metadata, payload }).await?;
        if code.is_ok() {
            Ok(())
        } else {
            Err(ProxyError::Broker(code))
        }
    }

    /// Allowed when both endpoints are preloaded or share a certificate.
    /// The broker re-runs this check with its own view of the sender.
    fn precheck_trust(&self, remote_app: &AppId) -> Result<(), ProxyError> {
        if self.packages.is_preload(&self.app_id) && self.packages.is_preload(remote_app) {
            return Ok(());
        }
        match self.packages.compare_certificates(&self.app_id, remote_app)? {
            CertMatch::Match => Ok(()),
            CertMatch::Mismatch => {
                tracing::error!("{remote_app} is not signed with our certificate");
                Err(ProxyError::CertificateNotMatch(remote_app.clone()))
            }
        }
    }

    /// Send one request frame and wait for its reply.
    ///
    /// The channel lock is held across both halves; replies carry no id and
    /// correlate with requests by order.
    async fn request(&self, frame: Frame) -> Result<ErrorCode, ProxyError> {
        let mut channel = self.request.lock().await;
        channel.send(frame).await?;
        match channel.next().await {
            Some(Ok(Frame::Reply { status })) => Ok(ErrorCode::from_status(status)),
            Some(Ok(other)) => {
                tracing::warn!("unexpected {:?} frame on request channel", other.kind());
                Err(ProxyError::Broker(ErrorCode::IoError))
            }
            Some(Err(err)) => Err(err.into()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "broker closed the request channel",
            )
            .into()),
        }
    }
}

impl Drop for MessagePortProxy {
    fn drop(&mut self) {
        self.reverse_task.abort();
    }
}

fn lock_tables(tables: &Mutex<PortTables>) -> MutexGuard<'_, PortTables> {
    match tables.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Read `DeliverMessage` frames from the reverse channel and invoke the
/// registered callbacks.
async fn run_reverse_channel(
    mut framed: Framed<UnixStream, FrameCodec>,
    tables: Arc<Mutex<PortTables>>,
) {
    while let Some(result) = framed.next().await {
        match result {
            Ok(Frame::DeliverMessage { payload, .. }) => dispatch_delivery(payload, &tables),
            Ok(other) => {
                tracing::warn!("unexpected {:?} frame on reverse channel", other.kind());
            }
            Err(err) => {
                tracing::warn!("reverse channel failed: {err}");
                break;
            }
        }
    }
    tracing::debug!("reverse channel closed");
}

/// Map a delivery envelope to its callback, strip the system keys, and
/// invoke it. Deliveries to ports without a callback are dropped silently.
fn dispatch_delivery(mut bundle: Bundle, tables: &Mutex<PortTables>) {
    let Some(port) = bundle.get(keys::REMOTE_PORT).map(str::to_string) else {
        tracing::warn!("dropping delivery without a destination port");
        return;
    };
    let trusted = bundle.get(keys::TRUSTED_MESSAGE) == Some("TRUE");
    let bidirectional = bundle.get(keys::MESSAGE_TYPE) == Some(keys::BI_DIR);

    let target = lock_tables(tables).delivery_target(&port, trusted);
    let Some((id, callback)) = target else {
        tracing::debug!("no callback registered for port {port}");
        return;
    };

    bundle.remove(keys::REMOTE_APPID);
    bundle.remove(keys::REMOTE_PORT);
    bundle.remove(keys::TRUSTED_MESSAGE);
    bundle.remove(keys::MESSAGE_TYPE);

    let message = if bidirectional {
        let peer_app_id = bundle.remove(keys::LOCAL_APPID);
        let peer_port = bundle.remove(keys::LOCAL_PORT);
        let trusted_peer = bundle.remove(keys::TRUSTED_LOCAL).as_deref() == Some("TRUE");
        DeliveredMessage {
            port_id: id,
            peer_app_id,
            peer_port,
            trusted_peer,
            bundle,
        }
    } else {
        DeliveredMessage {
            port_id: id,
            peer_app_id: None,
            peer_port: None,
            trusted_peer: false,
            bundle,
        }
    };
    callback(message);
}
