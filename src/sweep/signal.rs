use log::debug;
use thiserror::Error;

/// Failures of the completion signal channel
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("received a message without frames")]
    EmptyMessage,
}

impl SignalError {
    /// True for errors that leave the subscription usable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SignalError::EmptyMessage | SignalError::Zmq(zmq::Error::EINTR)
        )
    }
}

/// A two-frame pub/sub message: topic and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub topic: String,
    pub body: String,
}

impl SignalMessage {
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }

    /// Frame 0 is the topic, frame 1 the body. Extra frames are ignored.
    pub fn from_frames(frames: Vec<Vec<u8>>) -> Result<Self, SignalError> {
        let mut frames = frames.into_iter();
        let topic = frames.next().ok_or(SignalError::EmptyMessage)?;
        let body = frames.next().unwrap_or_default();
        Ok(Self {
            topic: String::from_utf8_lossy(&topic).into_owned(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Decides whether a message ends the wait for a configuration
#[derive(Debug, Clone)]
pub struct CompletionMatcher {
    topic: String,
}

impl CompletionMatcher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    /// Expected topic and a body containing `1`
    pub fn is_done(&self, message: &SignalMessage) -> bool {
        message.topic == self.topic && message.body.contains('1')
    }
}

/// Source of completion messages
pub trait SignalSource {
    /// Block until the next message arrives
    fn recv(&mut self) -> Result<SignalMessage, SignalError>;

    /// Return the next message if one is already queued
    fn try_recv(&mut self) -> Result<Option<SignalMessage>, SignalError>;
}

/// SUB socket subscribed to a single topic
pub struct ZmqSignalSource {
    socket: zmq::Socket,
    endpoint: String,
    // Declared after the socket so the socket is dropped first
    _context: zmq::Context,
}

impl ZmqSignalSource {
    /// Connect a fresh context's SUB socket to `endpoint`
    pub fn connect(endpoint: &str, topic: &str) -> Result<Self, SignalError> {
        Self::with_context(zmq::Context::new(), endpoint, topic)
    }

    pub fn with_context(
        context: zmq::Context,
        endpoint: &str,
        topic: &str,
    ) -> Result<Self, SignalError> {
        let socket = context.socket(zmq::SUB)?;
        // Do not hold the process open on drop
        socket.set_linger(0)?;
        socket.set_subscribe(topic.as_bytes())?;
        socket.connect(endpoint)?;
        debug!("Subscribed to '{topic}' on {endpoint}");
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
            _context: context,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SignalSource for ZmqSignalSource {
    fn recv(&mut self) -> Result<SignalMessage, SignalError> {
        let frames = self.socket.recv_multipart(0)?;
        SignalMessage::from_frames(frames)
    }

    fn try_recv(&mut self) -> Result<Option<SignalMessage>, SignalError> {
        match self.socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => SignalMessage::from_frames(frames).map(Some),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
