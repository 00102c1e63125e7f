//! Byte transport abstraction for the upper layer protocol.
//!
//! Associations and the message exchange engine are generic over a
//! [`Transport`], so that the reader loop can poll for incoming bytes
//! with a bounded wait while senders write through an independent clone
//! of the same connection.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// The outcome of polling a transport for incoming bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// this many bytes were read;
    /// zero means the peer closed the connection gracefully
    Ready(usize),
    /// no bytes arrived within the given wait
    TimedOut,
}

/// A full-duplex byte transport between two application entities.
///
/// `try_clone` must yield an independent handle over the same
/// connection, so that reading and writing can proceed from
/// different threads.
pub trait Transport: Read + Write + Send {
    /// Wait up to `timeout` for incoming bytes
    /// and read them into `buf`.
    fn poll_read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<Poll>;

    /// Create an independent handle over the same connection.
    fn try_clone(&self) -> std::io::Result<Self>
    where
        Self: Sized;

    /// Shut down both directions of the connection.
    fn shutdown(&self) -> std::io::Result<()>;
}

impl Transport for TcpStream {
    fn poll_read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<Poll> {
        self.set_read_timeout(Some(timeout))?;
        match self.read(buf) {
            Ok(n) => Ok(Poll::Ready(n)),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(Poll::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    fn try_clone(&self) -> std::io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        match TcpStream::shutdown(self, std::net::Shutdown::Both) {
            // already closed by the peer
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_poll_read_times_out_and_delivers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(
            client
                .poll_read(&mut buf, Duration::from_millis(20))
                .unwrap(),
            Poll::TimedOut
        );

        server.write_all(b"hi").unwrap();
        assert_eq!(
            client
                .poll_read(&mut buf, Duration::from_millis(500))
                .unwrap(),
            Poll::Ready(2)
        );
        assert_eq!(&buf[..2], b"hi");

        drop(server);
        assert_eq!(
            client
                .poll_read(&mut buf, Duration::from_millis(500))
                .unwrap(),
            Poll::Ready(0)
        );
    }
}
