use log::warn;

use crate::message::{Message, MessageArray};

use super::{
    BATCH, BATCH_RESPONSE, ProtocolError,
    client::{ClientError, QueryHandle},
};

pub(crate) type Callback = Box<dyn FnOnce(Result<Message, ClientError>) + Send + 'static>;

struct Slot {
    callback: Callback,
    handle: QueryHandle,
}

impl Slot {
    fn complete(self, result: Result<Message, ClientError>) {
        if !self.handle.is_cancelled() {
            (self.callback)(result);
        }
    }
}

/// Queries collected between `begin_batch` and `end_batch`.
pub(crate) struct Batch {
    requests: MessageArray,
    slots: Vec<Slot>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            requests: MessageArray::from_token(Some(BATCH.to_string())),
            slots: Vec::new(),
        }
    }

    pub fn push(&mut self, request: Message, callback: Callback, handle: QueryHandle) {
        self.requests.push(request);
        self.slots.push(Slot { callback, handle });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn into_parts(self) -> (Message, Slots) {
        (self.requests.into(), Slots(self.slots))
    }
}

/// Callbacks awaiting their share of a `BATCH_RESPONSE`, in request order.
pub(crate) struct Slots(Vec<Slot>);

impl Slots {
    /// Hands each slot its element of `reply`.
    ///
    /// If the batch as a whole failed, every slot receives
    /// [`ClientError::BatchFailed`] and the original error is returned.
    pub fn demultiplex(self, reply: Result<Message, ClientError>) -> Result<(), ClientError> {
        let slots = self.0;
        let elements = match reply.and_then(|reply| response_elements(reply, slots.len())) {
            Ok(elements) => elements,
            Err(e) => {
                warn!("batch of {} failed: {e}", slots.len());
                let reason = e.to_string();
                for slot in slots {
                    slot.complete(Err(ClientError::BatchFailed(reason.clone())));
                }
                return Err(e);
            }
        };

        for (slot, element) in slots.into_iter().zip(elements) {
            let result = match Message::try_from(element) {
                Ok(message) => match ProtocolError::from_message(&message) {
                    Some(error) => Err(error.into()),
                    None => Ok(message),
                },
                Err(e) => Err(ClientError::UnexpectedReply(e.to_string())),
            };
            slot.complete(result);
        }

        Ok(())
    }
}

fn response_elements(reply: Message, expected: usize) -> Result<MessageArray, ClientError> {
    match reply {
        Message::Array(array) if array.is(BATCH_RESPONSE) && array.len() == expected => Ok(array),
        other => Err(ClientError::UnexpectedReply(format!(
            "expected {BATCH_RESPONSE} with {expected} elements, got {other}"
        ))),
    }
}
