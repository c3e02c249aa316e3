use std::{
    collections::VecDeque,
    fmt,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    net::SocketAddr,
    sync::Arc,
};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::message::{Message, MessageError, MessageReader, ParseError};

use super::{ErrorKind, ProtocolError};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("reply does not answer the oldest pending request")]
    OutOfOrder,

    #[error("failed to encode reply: {0}")]
    Message(#[from] MessageError),

    #[error("connection IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A parsed message waiting for its reply.
///
/// Cloning is cheap; clones refer to the same queue entry.
#[derive(Debug, Clone)]
pub struct Request {
    seq: u64,
    message: Arc<Message>,
}

impl Request {
    pub fn message(&self) -> &Message {
        &self.message
    }

    fn same(&self, other: &Request) -> bool {
        self.seq == other.seq && Arc::ptr_eq(&self.message, &other.message)
    }
}

/// Receives every message a connection parses.
///
/// The handler runs on the connection's own thread and must answer each
/// request through [`Connection::send`] or [`Connection::error`], oldest first.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, connection: &mut Connection, request: Request) -> Result<(), ConnectionError>;
}

impl<F> Handler for F
where
    F: Fn(&mut Connection, Request) -> Result<(), ConnectionError> + Send + Sync + 'static,
{
    fn handle(&self, connection: &mut Connection, request: Request) -> Result<(), ConnectionError> {
        self(connection, request)
    }
}

/// Server side of one client connection.
///
/// Reads one message at a time, queues it, and hands it to the [`Handler`].
/// Replies must leave in the order requests arrived.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    reader: MessageReader<Box<dyn BufRead + Send>>,
    writer: BufWriter<Box<dyn Write + Send>>,
    pending: VecDeque<Request>,
    next_seq: u64,
}

impl Connection {
    pub fn new<R, W>(id: ConnectionId, reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(reader));
        let writer: Box<dyn Write + Send> = Box::new(writer);
        Self {
            id,
            peer: None,
            reader: MessageReader::new(reader),
            writer: BufWriter::new(writer),
            pending: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Number of requests parsed but not yet answered.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The request the next reply must answer.
    pub fn head(&self) -> Option<&Request> {
        self.pending.front()
    }

    /// Answers `request`, which must be the oldest pending request.
    pub fn send(
        &mut self,
        request: &Request,
        response: impl Into<Message>,
    ) -> Result<(), ConnectionError> {
        match self.pending.front() {
            Some(head) if head.same(request) => {}
            _ => {
                warn!("connection {}: out-of-order reply rejected", self.id);
                return Err(ConnectionError::OutOfOrder);
            }
        }

        let text = response.into().to_wire()?;
        self.pending.pop_front();
        trace!("connection {} <- {text}", self.id);
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Answers `request` with `ERROR{code=kind, message=text}`.
    pub fn error(
        &mut self,
        request: &Request,
        kind: ErrorKind,
        text: impl Into<String>,
    ) -> Result<(), ConnectionError> {
        self.send(request, ProtocolError::new(kind, text))
    }

    /// Writes an `ERROR` that answers no queued request, such as a reply to
    /// input that could not be parsed.
    fn reject(&mut self, error: ProtocolError) -> Result<(), ConnectionError> {
        if !self.pending.is_empty() {
            warn!(
                "connection {}: rejecting input with {} requests unanswered",
                self.id,
                self.pending.len()
            );
        }
        let text = Message::from(error).to_wire()?;
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Serves the connection until the peer disconnects.
    ///
    /// A clean end of stream returns `Ok`. Malformed input is answered with a
    /// `SYNTAX` error and reading continues; only IO failures end the loop with
    /// an error.
    pub fn run(&mut self, handler: &dyn Handler) -> Result<(), ConnectionError> {
        loop {
            let message = match self.reader.read_message() {
                Ok(message) => message,
                Err(ParseError::EndOfStream) => {
                    debug!("connection {}: end of stream", self.id);
                    return Ok(());
                }
                Err(ParseError::Syntax(reason)) => {
                    warn!("connection {}: syntax error: {reason}", self.id);
                    self.reject(ProtocolError::new(ErrorKind::Syntax, reason))?;
                    continue;
                }
                Err(ParseError::Io(e)) => return Err(e.into()),
            };

            trace!("connection {} -> {message}", self.id);
            let request = Request {
                seq: self.next_seq,
                message: Arc::new(message),
            };
            self.next_seq += 1;
            self.pending.push_back(request.clone());
            let handled = request.clone();

            match handler.handle(self, request) {
                Ok(()) => {}
                Err(ConnectionError::Io(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("connection {}: handler failed: {e}", self.id);
                    // A failed request left at the head would block every later reply.
                    if self.head().is_some_and(|head| head.same(&handled)) {
                        self.error(
                            &handled,
                            ErrorKind::ServerBug,
                            format!("request could not be answered: {e}"),
                        )?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::{Arc, Mutex},
    };

    use crate::message::MessageObject;

    use super::*;

    /// Write half that tests can inspect after the connection is done.
    #[derive(Clone, Default)]
    struct Output(Arc<Mutex<Vec<u8>>>);

    impl Write for Output {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Output {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn connection(input: &str) -> (Connection, Output) {
        let output = Output::default();
        let connection = Connection::new(
            ConnectionId(1),
            Cursor::new(input.as_bytes().to_vec()),
            output.clone(),
        );
        (connection, output)
    }

    fn pong() -> Message {
        MessageObject::new("PONG").unwrap().into()
    }

    fn echo(connection: &mut Connection, request: Request) -> Result<(), ConnectionError> {
        let reply = request.message().clone();
        connection.send(&request, reply)
    }

    #[test]
    fn replies_in_arrival_order() {
        let (mut connection, output) = connection("A{} B{x=1} [2]");

        connection.run(&echo).unwrap();

        assert_eq!(output.text(), "A{}B{x=1}[2]");
        assert_eq!(connection.pending(), 0);
    }

    #[test]
    fn syntax_error_is_reported_and_loop_continues() {
        let (mut connection, output) = connection("FOO { a = } PING{}");

        connection
            .run(&|connection: &mut Connection, request: Request| {
                connection.send(&request, pong())
            })
            .unwrap();

        let text = output.text();
        assert!(text.starts_with(&format!("ERROR{{code={},", ErrorKind::Syntax.ordinal())));
        assert!(text.ends_with("PONG{}"));
    }

    #[test]
    fn unencodable_reply_is_answered_with_server_bug() {
        let (mut connection, output) = connection("BAD{} PING{} PING{}");

        connection
            .run(&|connection: &mut Connection, request: Request| {
                if request.message().is("BAD") {
                    let reply = MessageObject::new("OUT").unwrap().with("x", f64::NAN).unwrap();
                    connection.send(&request, reply)
                } else {
                    connection.send(&request, pong())
                }
            })
            .unwrap();

        let text = output.text();
        assert!(text.starts_with(&format!("ERROR{{code={},", ErrorKind::ServerBug.ordinal())));
        assert!(text.ends_with("}PONG{}PONG{}"));
        assert_eq!(connection.pending(), 0);
    }

    #[test]
    fn out_of_order_reply_leaves_queue_intact() {
        let (mut connection, output) = connection("FIRST{} SECOND{}");
        let deferred = Arc::new(Mutex::new(None));
        let outcome = Arc::new(Mutex::new(None));

        let handler = {
            let deferred = Arc::clone(&deferred);
            let outcome = Arc::clone(&outcome);
            move |connection: &mut Connection, request: Request| -> Result<(), ConnectionError> {
                if request.message().is("FIRST") {
                    *deferred.lock().unwrap() = Some(request);
                    return Ok(());
                }

                let rejected = connection.send(&request, pong());
                let pending_after_reject = connection.pending();

                let first = deferred.lock().unwrap().take().unwrap();
                connection.send(&first, first.message().clone())?;
                connection.send(&request, request.message().clone())?;

                *outcome.lock().unwrap() = Some((rejected, pending_after_reject));
                Ok(())
            }
        };

        connection.run(&handler).unwrap();

        let (rejected, pending_after_reject) = outcome.lock().unwrap().take().unwrap();
        assert!(matches!(rejected, Err(ConnectionError::OutOfOrder)));
        assert_eq!(pending_after_reject, 2);
        assert_eq!(output.text(), "FIRST{}SECOND{}");
    }

    #[test]
    fn error_reply_pops_the_head() {
        let (mut connection, output) = connection("MOVE_FLEET{fleetId=9}");

        connection
            .run(&|connection: &mut Connection, request: Request| {
                connection.error(&request, ErrorKind::UnknownFleet, "no fleet 9")
            })
            .unwrap();

        assert_eq!(
            output.text(),
            format!(
                "ERROR{{code={},message=\"no fleet 9\"}}",
                ErrorKind::UnknownFleet.ordinal()
            )
        );
        assert_eq!(connection.pending(), 0);
    }

    #[test]
    fn unanswered_requests_stay_queued() {
        let (mut connection, output) = connection("A{} B{}");

        connection
            .run(&|_: &mut Connection, _: Request| -> Result<(), ConnectionError> { Ok(()) })
            .unwrap();

        assert_eq!(connection.pending(), 2);
        assert!(connection.head().unwrap().message().is("A"));
        assert_eq!(output.text(), "");
    }
}
