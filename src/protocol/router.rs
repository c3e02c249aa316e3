use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{debug, error};

use crate::message::{Message, MessageArray, MessageObject, MessageValue};

use super::{
    BATCH, BATCH_RESPONSE, BYE, ConnectionError, ErrorKind, LOGIN, LOGOUT, PING, PONG,
    ProtocolError, SessionStore, WELCOME,
    connection::{Connection, Handler, Request},
};

pub type RouteResult = Result<Message, ProtocolError>;

type PublicRoute = Box<dyn Fn(&MessageObject) -> RouteResult + Send + Sync>;
type AuthenticatedRoute = Box<dyn Fn(&Caller, &MessageObject) -> RouteResult + Send + Sync>;

enum Route {
    Public(PublicRoute),
    Authenticated(AuthenticatedRoute),
}

/// The user behind an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
}

/// Dispatches messages to handlers by message name.
///
/// `PING` is always answered. A router built with [`Router::with_sessions`]
/// also answers `LOGIN` and `LOGOUT` and can host authenticated routes, which
/// only run once the request's `user` and `sessionId` attributes validate.
/// `BATCH[...]` is answered with `BATCH_RESPONSE[...]`, one slot per element;
/// a failing element yields an `ERROR` in its slot without affecting the rest.
pub struct Router {
    routes: HashMap<String, Route>,
    sessions: Option<Arc<SessionStore>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            sessions: None,
        }
        .route(PING, |_| Ok(MessageObject::new(PONG)?.into()))
    }

    pub fn with_sessions(sessions: Arc<SessionStore>) -> Self {
        let store = Arc::clone(&sessions);
        let logout_store = Arc::clone(&sessions);
        let mut router = Self::new()
            .route(LOGIN, move |request| {
                let user = request.get_string("user")?;
                let session_id = store.login(
                    user,
                    request.get_string("passphrase")?,
                    request.get_string("version")?,
                )?;

                Ok(MessageObject::new(WELCOME)?
                    .with("user", user)?
                    .with("sessionId", session_id)?
                    .into())
            })
            .route_authenticated(LOGOUT, move |caller, _| {
                logout_store.logout(&caller.user);
                Ok(MessageObject::new(BYE)?.into())
            });
        router.sessions = Some(sessions);
        router
    }

    /// Registers a handler anyone may call.
    pub fn route<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&MessageObject) -> RouteResult + Send + Sync + 'static,
    {
        self.routes
            .insert(name.to_string(), Route::Public(Box::new(handler)));
        self
    }

    /// Registers a handler that requires a valid session.
    pub fn route_authenticated<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&Caller, &MessageObject) -> RouteResult + Send + Sync + 'static,
    {
        self.routes
            .insert(name.to_string(), Route::Authenticated(Box::new(handler)));
        self
    }

    /// Computes the reply for one message.
    pub fn dispatch(&self, message: &Message) -> RouteResult {
        match message {
            Message::Array(batch) if batch.is(BATCH) => Ok(self.dispatch_batch(batch).into()),
            Message::Object(request) => {
                let name = request.name().unwrap_or_default();
                let route = self.routes.get(name).ok_or_else(|| {
                    ProtocolError::new(ErrorKind::UnknownMessage, format!("no handler for '{name}'"))
                })?;

                let result = panic::catch_unwind(AssertUnwindSafe(|| match route {
                    Route::Public(handler) => handler(request),
                    Route::Authenticated(handler) => {
                        let caller = self.authenticate(request)?;
                        handler(&caller, request)
                    }
                }));

                result.unwrap_or_else(|_| {
                    error!("handler for '{name}' panicked");
                    Err(ProtocolError::new(
                        ErrorKind::ServerBug,
                        format!("handler for '{name}' failed"),
                    ))
                })
            }
            Message::Array(array) => Err(ProtocolError::new(
                ErrorKind::UnknownMessage,
                format!("no handler for array '{}'", array.name().unwrap_or_default()),
            )),
        }
    }

    fn dispatch_batch(&self, batch: &MessageArray) -> MessageArray {
        let mut response = MessageArray::from_token(Some(BATCH_RESPONSE.to_string()));

        for element in batch {
            let result = match Message::try_from(element.clone()) {
                Ok(message) if message.is(BATCH) => Err(ProtocolError::new(
                    ErrorKind::Format,
                    "batches cannot be nested",
                )),
                Ok(message) => self.dispatch(&message).and_then(|reply| {
                    reply.check_encodable().map_err(|e| {
                        error!("unencodable reply in batch slot {}: {e}", response.len());
                        ProtocolError::new(
                            ErrorKind::ServerBug,
                            format!("reply could not be encoded: {e}"),
                        )
                    })?;
                    Ok(reply)
                }),
                Err(e) => Err(e.into()),
            };

            response.push(match result {
                Ok(reply) => MessageValue::from(reply),
                Err(error) => MessageValue::Object(error.to_object()),
            });
        }

        debug!("answered batch of {}", response.len());
        response
    }

    fn authenticate(&self, request: &MessageObject) -> Result<Caller, ProtocolError> {
        let not_logged_in =
            |reason: &str| ProtocolError::new(ErrorKind::NotLoggedIn, reason.to_string());

        let sessions = self
            .sessions
            .as_ref()
            .ok_or_else(|| not_logged_in("server does not accept logins"))?;
        let user = request
            .get_string("user")
            .map_err(|_| not_logged_in("request carries no user"))?;
        let session_id = request
            .get_string("sessionId")
            .map_err(|_| not_logged_in("request carries no sessionId"))?;

        sessions.validate(user, session_id)?;
        Ok(Caller {
            user: user.to_string(),
        })
    }
}

impl Handler for Router {
    fn handle(&self, connection: &mut Connection, request: Request) -> Result<(), ConnectionError> {
        let reply = match self.dispatch(request.message()) {
            Ok(reply) => reply,
            Err(error) => {
                debug!("connection {}: {error}", connection.id());
                error.into()
            }
        };

        match connection.send(&request, reply) {
            Err(ConnectionError::Message(e)) => connection.error(
                &request,
                ErrorKind::ServerBug,
                format!("reply could not be encoded: {e}"),
            ),
            result => result,
        }
    }
}
