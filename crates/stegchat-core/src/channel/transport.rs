//! Connected byte streams a [`SecureChannel`](super::SecureChannel) can run on.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::result::Result;

/// A bidirectional, already connected byte stream.
///
/// Besides reading and writing, a transport can tell whether data (or end of
/// stream) is waiting without consuming it. That is what lets the relay check many
/// sessions in turn without blocking on a quiet one.
pub trait Transport: Read + Write + Send {
    /// Waits at most `timeout` for readable data.
    ///
    /// Returns `Ok(true)` when data is waiting or the peer closed the stream (the
    /// following read then reports the closure), `Ok(false)` when the window
    /// expired. A zero timeout checks without waiting.
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool>;

    /// Deadline for every blocking read, `None` blocks forever
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Deadline for every blocking write, `None` blocks forever
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Closes both directions, pending reads on the peer see end of stream
    fn shutdown(&mut self) -> Result<()>;

    /// Human readable peer address for log messages
    fn peer(&self) -> String;
}

impl Transport for TcpStream {
    fn poll_readable(&mut self, timeout: Duration) -> Result<bool> {
        let mut probe = [0u8; 1];

        let peeked = if timeout.is_zero() {
            self.set_nonblocking(true)?;
            let peeked = self.peek(&mut probe);
            self.set_nonblocking(false)?;
            peeked
        } else {
            let previous = self.read_timeout()?;
            TcpStream::set_read_timeout(self, Some(timeout))?;
            let peeked = self.peek(&mut probe);
            TcpStream::set_read_timeout(self, previous)?;
            peeked
        };

        match peeked {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        Ok(TcpStream::set_read_timeout(self, timeout)?)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        Ok(TcpStream::set_write_timeout(self, timeout)?)
    }

    fn shutdown(&mut self) -> Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            // already torn down by the peer
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => Ok(other?),
        }
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn should_report_quiet_streams_as_not_readable() {
        let (_client, mut server) = pair();

        assert!(!server.poll_readable(Duration::ZERO).unwrap());
        assert!(!server.poll_readable(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn should_not_consume_the_probed_byte() {
        let (mut client, mut server) = pair();
        client.write_all(b"x").unwrap();

        assert!(server.poll_readable(Duration::from_secs(2)).unwrap());
        let mut buf = [0u8; 1];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn should_report_a_closed_peer_as_readable() {
        let (mut client, mut server) = pair();
        Transport::shutdown(&mut client).unwrap();

        assert!(server.poll_readable(Duration::from_secs(2)).unwrap());
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn should_restore_the_read_timeout_after_polling() {
        let (_client, mut server) = pair();
        Transport::set_read_timeout(&mut server, Some(Duration::from_millis(300))).unwrap();

        server.poll_readable(Duration::from_millis(10)).unwrap();

        assert_eq!(server.read_timeout().unwrap(), Some(Duration::from_millis(300)));
    }
}
