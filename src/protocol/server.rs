use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use thiserror::Error;

use super::{
    Connection, ConnectionId, Handler, PoolClosed, Spawner, ThreadPool,
};

pub const DEFAULT_WORKERS: usize = 16;

const WAKE_ATTEMPTS: u32 = 3;
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);
const WAKE_BACKOFF: Duration = Duration::from_millis(50);

type Admission = Box<dyn Fn(&Connection) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Pool(#[from] PoolClosed),
}

/// State shared by the accept thread, the connection workers and any
/// [`ShutdownHandle`].
struct Shared {
    handler: Arc<dyn Handler>,
    admission: Option<Admission>,
    registry: Mutex<HashMap<ConnectionId, TcpStream>>,
    closing: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<ConnectionId, TcpStream>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn accept(self: &Arc<Self>, stream: TcpStream, spawner: &Spawner) -> Result<(), ServerError> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let peer = stream.peer_addr().ok();

        stream.set_nodelay(true)?;
        let control = stream.try_clone()?;
        let connection = Connection::new(id, stream.try_clone()?, stream).with_peer(peer);

        if let Some(admit) = &self.admission {
            if !admit(&connection) {
                info!("connection {id} from {} rejected", describe(peer));
                let _ = control.shutdown(Shutdown::Both);
                return Ok(());
            }
        }

        self.registry().insert(id, control);
        info!("connection {id} accepted from {}", describe(peer));

        let shared = Arc::clone(self);
        if let Err(e) = spawner.execute(move || shared.serve(connection)) {
            self.unregister(id);
            return Err(e.into());
        }
        Ok(())
    }

    fn serve(&self, mut connection: Connection) {
        let id = connection.id();
        match connection.run(&*self.handler) {
            Ok(()) => info!("connection {id} closed"),
            Err(e) if self.is_closing() => debug!("connection {id} closed during shutdown: {e}"),
            Err(e) => warn!("connection {id} failed: {e}"),
        }
        self.unregister(id);
    }

    fn unregister(&self, id: ConnectionId) {
        if let Some(stream) = self.registry().remove(&id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn close_all(&self) {
        for (id, stream) in self.registry().drain() {
            debug!("closing connection {id}");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn describe(peer: Option<SocketAddr>) -> String {
    peer.map_or_else(|| "unknown peer".to_string(), |p| p.to_string())
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, spawner: Spawner) {
    for stream in listener.incoming() {
        if shared.is_closing() {
            break;
        }

        match stream {
            Ok(stream) => {
                if let Err(e) = shared.accept(stream, &spawner) {
                    warn!("failed to set up connection: {e}");
                }
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
    debug!("accept loop stopped");
}

/// Configures a [`MessageServer`] before it binds.
pub struct ServerBuilder {
    handler: Arc<dyn Handler>,
    workers: usize,
    admission: Option<Admission>,
}

impl ServerBuilder {
    /// Number of connections served at the same time. Further connections
    /// wait for a free worker.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Decides whether a freshly accepted connection is kept.
    pub fn admit<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Connection) -> bool + Send + Sync + 'static,
    {
        self.admission = Some(Box::new(predicate));
        self
    }

    pub fn bind<A: ToSocketAddrs>(self, address: A) -> Result<MessageServer, ServerError> {
        let listener = TcpListener::bind(address)?;
        let address = listener.local_addr()?;

        let pool = ThreadPool::named("tether-conn", self.workers);
        let spawner = pool.spawner().ok_or(PoolClosed)?;

        let shared = Arc::new(Shared {
            handler: self.handler,
            admission: self.admission,
            registry: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("tether-accept".to_string())
            .spawn(move || accept_loop(listener, accept_shared, spawner))?;

        info!("listening at {address}");
        Ok(MessageServer {
            address,
            shared,
            accept: Some(accept),
            pool: Some(pool),
        })
    }
}

/// Listens for connections and runs each one on a worker of its pool.
///
/// Dropping the server shuts it down and waits for every connection thread.
pub struct MessageServer {
    address: SocketAddr,
    shared: Arc<Shared>,
    accept: Option<JoinHandle<()>>,
    pool: Option<ThreadPool>,
}

impl MessageServer {
    pub fn builder<H: Handler>(handler: H) -> ServerBuilder {
        ServerBuilder {
            handler: Arc::new(handler),
            workers: DEFAULT_WORKERS,
            admission: None,
        }
    }

    /// Binds with default settings.
    pub fn bind<A: ToSocketAddrs, H: Handler>(address: A, handler: H) -> Result<Self, ServerError> {
        Self::builder(handler).bind(address)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Number of live connections.
    pub fn connections(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            address: self.address,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks until a [`ShutdownHandle`] stops the server, then waits for
    /// every connection to finish.
    pub fn wait(mut self) {
        self.join_accept();
    }

    pub fn shutdown(self) {
        self.shutdown_handle().shutdown();
    }

    fn join_accept(&mut self) {
        if let Some(accept) = self.accept.take() {
            if accept.join().is_err() {
                error!("accept thread panicked");
            }
        }
    }
}

impl Drop for MessageServer {
    fn drop(&mut self) {
        self.shutdown_handle().shutdown();
        self.join_accept();

        // Connections accepted while the shutdown was in progress.
        self.shared.close_all();
        drop(self.pool.take());
        info!("server at {} stopped", self.address);
    }
}

/// Stops a [`MessageServer`] from another thread, e.g. a signal handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    address: SocketAddr,
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Stops accepting and closes every live connection. Calling it more than
    /// once has no further effect.
    pub fn shutdown(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down server at {}", self.address);

        // The accept loop only notices the flag once `accept` returns.
        wake_accept_loop(self.address);
        self.shared.close_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_closing()
    }
}

/// Connects to the listener so a blocked `accept` returns. Returns `false`
/// if no attempt got through, in which case the accept thread keeps running
/// until some other client connects.
fn wake_accept_loop(address: SocketAddr) -> bool {
    let target = wake_address(address);
    for attempt in 1..=WAKE_ATTEMPTS {
        match TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
            Ok(_) => return true,
            Err(e) if attempt == WAKE_ATTEMPTS => {
                warn!("could not wake accept loop at {target}: {e}; waiting on it may block");
            }
            Err(e) => {
                debug!("wake attempt {attempt} at {target} failed: {e}");
                thread::sleep(WAKE_BACKOFF);
            }
        }
    }
    false
}

fn wake_address(address: SocketAddr) -> SocketAddr {
    match address.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), address.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), address.port())
        }
        _ => address,
    }
}
