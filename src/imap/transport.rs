/// Byte stream a session runs over, and how to swap it mid-session

use futures_util::future::BoxFuture;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any ordered, reliable byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Replaces the session's stream with a wrapped one (e.g. TLS after STARTTLS)
///
/// The session keeps its framer, continuation slot, state and notes across
/// the swap; only the stream changes hands.
pub trait TransportUpgrade: Send {
    fn upgrade(self: Box<Self>, stream: BoxedStream) -> BoxFuture<'static, io::Result<BoxedStream>>;
}
