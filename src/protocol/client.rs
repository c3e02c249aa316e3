use std::{
    io::{self, BufReader, BufWriter, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
};

use log::{debug, error, info, trace};
use thiserror::Error;

use crate::message::{Message, MessageError, MessageObject, MessageReader, ParseError};

use super::{
    Dispatcher, Immediate, LOGIN, PING, PONG, PoolClosed, ProtocolError, Session, ThreadPool,
    WELCOME, batch::Batch,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("server closed the connection")]
    Disconnected,

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("server error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid request: {0}")]
    Message(#[from] MessageError),

    #[error("a batch is already open")]
    BatchOpen,

    #[error("no batch is open")]
    BatchNotOpen,

    #[error("batch failed: {0}")]
    BatchFailed(String),

    #[error("client has shut down")]
    Closed,
}

impl From<ParseError> for ClientError {
    fn from(value: ParseError) -> Self {
        match value {
            ParseError::Syntax(reason) => ClientError::MalformedReply(reason),
            ParseError::EndOfStream => ClientError::Disconnected,
            ParseError::Io(e) => ClientError::Transport(e),
        }
    }
}

impl From<PoolClosed> for ClientError {
    fn from(_: PoolClosed) -> Self {
        ClientError::Closed
    }
}

/// Cancels the completion of an asynchronous query.
///
/// A request that was already written is not retracted; cancelling only keeps
/// its callback from running, or skips the request if it is still queued.
#[derive(Debug, Clone, Default)]
pub struct QueryHandle {
    cancelled: Arc<AtomicBool>,
}

impl QueryHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A reply that has not arrived yet.
#[derive(Debug)]
pub struct PendingReply {
    receiver: mpsc::Receiver<Result<Message, ClientError>>,
}

impl PendingReply {
    /// Blocks until the reply arrives.
    pub fn wait(self) -> Result<Message, ClientError> {
        self.receiver.recv().map_err(|_| ClientError::Closed)?
    }

    /// Returns the reply if it has arrived, without blocking.
    pub fn try_wait(&self) -> Option<Result<Message, ClientError>> {
        match self.receiver.try_recv() {
            Ok(reply) => Some(reply),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(ClientError::Closed)),
        }
    }
}

/// Both halves of the socket; only ever touched by the client's worker.
struct Link {
    reader: MessageReader<BufReader<TcpStream>>,
    writer: BufWriter<TcpStream>,
    broken: bool,
}

impl Link {
    /// Writes `request` and reads the reply written in answer to it.
    fn exchange(&mut self, request: &Message) -> Result<Message, ClientError> {
        if self.broken {
            return Err(ClientError::Disconnected);
        }

        let text = request.to_wire()?;
        let reply = match self.round_trip(&text) {
            Ok(reply) => reply,
            Err(e) => {
                // The stream position is unknown after a failure; nothing more can be paired.
                self.broken = true;
                return Err(e);
            }
        };

        match ProtocolError::from_message(&reply) {
            Some(error) => Err(error.into()),
            None => Ok(reply),
        }
    }

    fn round_trip(&mut self, text: &str) -> Result<Message, ClientError> {
        trace!("-> {text}");
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;

        let reply = self.reader.read_message()?;
        trace!("<- {reply}");
        Ok(reply)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client end of a connection.
///
/// All traffic goes through one worker thread, so requests are written in call
/// order and each reply is matched to the request just before it. Only one
/// request is in flight at a time.
///
/// # Example
///
/// ```no_run
/// use tether::{message::MessageObject, protocol::MessageClient};
///
/// let client = MessageClient::connect("127.0.0.1:7777")?;
/// let session = client.login("a", "secret", "2.0")?;
///
/// let request = session.sign(MessageObject::new("MOVE_FLEET")?.with("fleetId", 3)?)?;
/// let reply = client.query(request)?;
/// println!("{reply}");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct MessageClient {
    link: Arc<Mutex<Link>>,
    control: TcpStream,
    dispatcher: Arc<dyn Dispatcher>,
    batch: Mutex<Option<Batch>>,
    worker: ThreadPool,
}

impl MessageClient {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, ClientError> {
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            info!("connected to {peer}");
        }

        let link = Link {
            reader: MessageReader::new(BufReader::new(stream.try_clone()?)),
            writer: BufWriter::new(stream.try_clone()?),
            broken: false,
        };

        Ok(Self {
            link: Arc::new(Mutex::new(link)),
            control: stream,
            dispatcher: Arc::new(Immediate),
            batch: Mutex::new(None),
            worker: ThreadPool::named("tether-client", 1),
        })
    }

    /// Sets where asynchronous completions run. Defaults to [`Immediate`].
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Sends `request` and blocks until its reply arrives.
    ///
    /// An `ERROR` reply is returned as [`ClientError::Protocol`].
    pub fn query(&self, request: impl Into<Message>) -> Result<Message, ClientError> {
        self.query_deferred(request)?.wait()
    }

    /// Queues `request` and returns a handle to wait on its reply later.
    pub fn query_deferred(&self, request: impl Into<Message>) -> Result<PendingReply, ClientError> {
        if self.is_batching() {
            return Err(ClientError::BatchOpen);
        }

        let request = request.into();
        let link = Arc::clone(&self.link);
        let (tx, rx) = mpsc::sync_channel(1);

        self.worker.execute(move || {
            let _ = tx.send(lock(&link).exchange(&request));
        })?;

        Ok(PendingReply { receiver: rx })
    }

    /// Queues `request` and returns immediately; `callback` later receives the
    /// reply on the configured [`Dispatcher`].
    ///
    /// While a batch is open the request joins the batch instead.
    pub fn query_async<F>(&self, request: impl Into<Message>, callback: F) -> QueryHandle
    where
        F: FnOnce(Result<Message, ClientError>) + Send + 'static,
    {
        self.query_async_on(request, Arc::clone(&self.dispatcher), callback)
    }

    /// Like [`MessageClient::query_async`], with `callback` delivered through
    /// `dispatcher` instead of the client's own.
    ///
    /// Inside a batch, every callback is delivered with the batch.
    pub fn query_async_on<F>(
        &self,
        request: impl Into<Message>,
        dispatcher: Arc<dyn Dispatcher>,
        callback: F,
    ) -> QueryHandle
    where
        F: FnOnce(Result<Message, ClientError>) + Send + 'static,
    {
        let request = request.into();
        let handle = QueryHandle::new();

        if let Some(batch) = lock(&self.batch).as_mut() {
            batch.push(request, Box::new(callback), handle.clone());
            return handle;
        }

        self.submit(request, dispatcher, handle.clone(), callback);
        handle
    }

    fn submit<F>(
        &self,
        request: Message,
        dispatcher: Arc<dyn Dispatcher>,
        handle: QueryHandle,
        complete: F,
    ) where
        F: FnOnce(Result<Message, ClientError>) + Send + 'static,
    {
        let link = Arc::clone(&self.link);

        let job = move || {
            if handle.is_cancelled() {
                debug!("skipping cancelled query");
                return;
            }

            let result = lock(&link).exchange(&request);
            dispatcher.dispatch(Box::new(move || {
                if handle.is_cancelled() {
                    debug!("completion suppressed for cancelled query");
                    return;
                }
                complete(result);
            }));
        };

        if self.worker.execute(job).is_err() {
            error!("query dropped: client worker has shut down");
        }
    }

    /// Starts collecting asynchronous queries into one `BATCH` request.
    pub fn begin_batch(&self) -> Result<(), ClientError> {
        let mut batch = lock(&self.batch);
        if batch.is_some() {
            return Err(ClientError::BatchOpen);
        }
        *batch = Some(Batch::new());
        Ok(())
    }

    pub fn is_batching(&self) -> bool {
        lock(&self.batch).is_some()
    }

    /// Sends the collected queries as one request.
    ///
    /// Each callback receives its own slot of the `BATCH_RESPONSE`, in the
    /// order the queries were made; `on_complete` runs after the last of them.
    /// An empty batch completes without touching the network.
    pub fn end_batch<F>(&self, on_complete: F) -> Result<QueryHandle, ClientError>
    where
        F: FnOnce(Result<(), ClientError>) + Send + 'static,
    {
        let batch = lock(&self.batch).take().ok_or(ClientError::BatchNotOpen)?;
        let handle = QueryHandle::new();

        if batch.is_empty() {
            let cancelled = handle.clone();
            self.dispatcher.dispatch(Box::new(move || {
                if !cancelled.is_cancelled() {
                    on_complete(Ok(()));
                }
            }));
            return Ok(handle);
        }

        debug!("sending batch of {}", batch.len());
        let (request, slots) = batch.into_parts();
        let dispatcher = Arc::clone(&self.dispatcher);
        self.submit(request, dispatcher, handle.clone(), move |reply| {
            on_complete(slots.demultiplex(reply));
        });
        Ok(handle)
    }

    /// Discards the open batch without sending anything.
    pub fn cancel_batch(&self) -> Result<(), ClientError> {
        let batch = lock(&self.batch).take().ok_or(ClientError::BatchNotOpen)?;
        debug!("discarded batch of {}", batch.len());
        Ok(())
    }

    pub fn ping(&self) -> Result<(), ClientError> {
        let reply = self.query(MessageObject::new(PING)?)?;
        if reply.is(PONG) {
            Ok(())
        } else {
            Err(ClientError::UnexpectedReply(reply.to_string()))
        }
    }

    /// Performs the login handshake.
    pub fn login(
        &self,
        user: &str,
        passphrase: &str,
        version: &str,
    ) -> Result<Session, ClientError> {
        let request = MessageObject::new(LOGIN)?
            .with("user", user)?
            .with("passphrase", passphrase)?
            .with("version", version)?;

        let reply = self.query(request)?;
        let welcome = reply
            .as_object()
            .filter(|o| o.is(WELCOME))
            .ok_or_else(|| ClientError::UnexpectedReply(reply.to_string()))?;

        Ok(Session {
            user: user.to_string(),
            session_id: welcome.get_string("sessionId")?.to_string(),
        })
    }

    /// Closes the socket. Queued and future queries fail.
    pub fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

impl Drop for MessageClient {
    fn drop(&mut self) {
        self.close();
    }
}
