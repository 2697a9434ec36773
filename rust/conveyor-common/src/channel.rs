//! Request/response plumbing over [tokio::sync::mpsc] channels. Many
//! [RequestClient]s may send requests to a single [RequestProcessor], and
//! each request may carry a one-shot reply path back to its sender.

use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, mpsc::error::SendError, oneshot, oneshot::error::RecvError};

/// Failures of the channel itself, as opposed to failures reported by the
/// processor in its reply.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The processor side of the channel has been dropped.
    #[error("channel send error: processor is gone")]
    Send,
    /// The processor dropped the request without replying.
    #[error("channel receive error: request was dropped without a reply")]
    Recv,
}

impl<Q, S, E> From<SendError<Envelope<Q, S, E>>> for ChannelError {
    fn from(_: SendError<Envelope<Q, S, E>>) -> Self {
        ChannelError::Send
    }
}

impl From<RecvError> for ChannelError {
    fn from(_: RecvError) -> Self {
        ChannelError::Recv
    }
}

/// A request delivered to a [RequestProcessor], along with the means to
/// reply to whoever sent it.
pub struct Envelope<Q, S, E> {
    /// The wrapped request.
    pub request: Q,
    reply: Option<oneshot::Sender<Result<S, E>>>,
}

impl<Q, S, E> Envelope<Q, S, E> {
    /// Whether the sender is waiting on a reply.
    pub fn expects_reply(&self) -> bool {
        self.reply
            .as_ref()
            .map(|reply| !reply.is_closed())
            .unwrap_or(false)
    }

    /// Reply to the sender of this [Envelope]. Returns `false` if the
    /// request was one-way or the sender stopped waiting.
    pub fn respond(self, response: Result<S, E>) -> bool {
        match self.reply {
            Some(reply) => reply.send(response).is_ok(),
            None => false,
        }
    }

    /// Split the envelope into its request and a detached [Responder].
    pub fn into_parts(self) -> (Q, Responder<S, E>) {
        (self.request, Responder { reply: self.reply })
    }
}

impl<Q: fmt::Debug, S, E> fmt::Debug for Envelope<Q, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("request", &self.request)
            .field("expects_reply", &self.expects_reply())
            .finish()
    }
}

/// The reply half of an [Envelope] once its request has been taken out.
pub struct Responder<S, E> {
    reply: Option<oneshot::Sender<Result<S, E>>>,
}

impl<S, E> Responder<S, E> {
    /// See [Envelope::respond].
    pub fn respond(self, response: Result<S, E>) -> bool {
        match self.reply {
            Some(reply) => reply.send(response).is_ok(),
            None => false,
        }
    }
}

/// Sends requests to the associated [RequestProcessor].
///
/// Instances are created by [request_channel].
#[derive(Debug)]
pub struct RequestClient<Q, S, E> {
    tx: mpsc::UnboundedSender<Envelope<Q, S, E>>,
}

impl<Q, S, E> RequestClient<Q, S, E> {
    /// Sends a one-way request; the processor cannot reply to it. Use
    /// [RequestClient::send] when a reply is needed.
    pub fn send_oneshot(&self, request: Q) -> Result<(), ChannelError> {
        self.tx.send(Envelope {
            request,
            reply: None,
        })?;
        Ok(())
    }

    /// Sends a request and waits for the processor to reply.
    pub async fn send(&self, request: Q) -> Result<Result<S, E>, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Envelope {
            request,
            reply: Some(reply),
        })?;
        Ok(rx.await?)
    }

    /// Whether the processor side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// Manual impl so the generics are not required to be `Clone`.
impl<Q, S, E> Clone for RequestClient<Q, S, E> {
    fn clone(&self) -> Self {
        RequestClient {
            tx: self.tx.clone(),
        }
    }
}

/// Receives requests from any number of [RequestClient]s.
///
/// Instances are created by [request_channel].
pub struct RequestProcessor<Q, S, E> {
    rx: mpsc::UnboundedReceiver<Envelope<Q, S, E>>,
}

impl<Q, S, E> RequestProcessor<Q, S, E> {
    /// Awaits the next request, or [None] once every client is dropped.
    pub async fn pull(&mut self) -> Option<Envelope<Q, S, E>> {
        self.rx.recv().await
    }
}

/// Creates a bound [RequestClient] and [RequestProcessor] pair.
pub fn request_channel<Q, S, E>() -> (RequestClient<Q, S, E>, RequestProcessor<Q, S, E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RequestClient { tx }, RequestProcessor { rx })
}
