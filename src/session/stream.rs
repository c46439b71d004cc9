//! Unifies the plain and TLS-upgraded halves of a connection behind one
//! type so the session's read/write loop doesn't need to know which one
//! it's holding at any given moment.
//!
//! Adapted from the enum-of-transports shape the wider example pack uses to
//! carry a connection across a mid-session protocol upgrade: a small enum
//! implementing [`AsyncRead`]/[`AsyncWrite`] by delegating to whichever
//! variant is live, plus a transient placeholder variant so the upgrade can
//! take the plain stream out of the enum by value (via `mem::replace`)
//! without a moment where the session doesn't own a stream at all.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// Either half of a connection that has or hasn't gone through `STARTTLS`.
pub enum SessionStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Held only for the instant between taking the plain stream out for
    /// the TLS handshake and putting the wrapped stream back in. Any I/O
    /// attempted while a `SessionStream` is in this state is an internal
    /// bug, not a protocol-level failure.
    Upgrading,
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            SessionStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            SessionStream::Upgrading => {
                panic!("SessionStream polled while mid-upgrade")
            }
        }
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SessionStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            SessionStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            SessionStream::Upgrading => {
                panic!("SessionStream polled while mid-upgrade")
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(s) => Pin::new(s).poll_flush(cx),
            SessionStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            SessionStream::Upgrading => {
                panic!("SessionStream polled while mid-upgrade")
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SessionStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            SessionStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            SessionStream::Upgrading => {
                panic!("SessionStream polled while mid-upgrade")
            }
        }
    }
}

impl SessionStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, SessionStream::Tls(_))
    }
}
