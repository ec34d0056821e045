//! Transport seams for the bridge.
//!
//! The bridge talks to the network only through [`Listener`] and
//! [`Connection`], implemented here for Tokio's TCP types.  Tests swap in
//! scripted implementations to exercise failure handling.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One connected peer.
///
/// `read` must be cancel-safe: the bridge races it against bus wake-ups and
/// drops it when the bus wins.
#[async_trait]
pub trait Connection: Send {
    /// Read whatever is available. `Ok(0)` means the peer closed.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Write a prefix of `buf`, returning how much was taken.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Source of new connections.
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next peer, returning it with a printable address.
    async fn accept(&mut self) -> io::Result<(Box<dyn Connection>, String)>;
}

/// Write the whole of `frame`, looping over partial writes.
///
/// # Errors
///
/// The first write error, or [`io::ErrorKind::WriteZero`] if the connection
/// stops accepting bytes.
pub async fn send_all(conn: &mut dyn Connection, frame: &[u8]) -> io::Result<()> {
    let mut rest = frame;
    while !rest.is_empty() {
        match conn.write(rest).await? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection accepted no bytes",
                ));
            }
            n => rest = &rest[n..],
        }
    }
    Ok(())
}

#[async_trait]
impl Connection for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&mut self) -> io::Result<(Box<dyn Connection>, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per write.
    struct Trickle {
        chunk: usize,
        written: Vec<u8>,
        calls: usize,
    }

    #[async_trait]
    impl Connection for Trickle {
        async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            let n = buf.len().min(self.chunk);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        async fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_all_loops_over_partial_writes() {
        let mut conn = Trickle { chunk: 3, written: Vec::new(), calls: 0 };
        let frame: Vec<u8> = (0..10).collect();
        send_all(&mut conn, &frame).await.unwrap();
        assert_eq!(conn.written, frame);
        assert_eq!(conn.calls, 4);
    }

    #[tokio::test]
    async fn send_all_fails_on_zero_write() {
        let mut conn = Trickle { chunk: 0, written: Vec::new(), calls: 0 };
        let err = send_all(&mut conn, b"abc").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    #[tokio::test]
    async fn tcp_round_trip() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            send_all(&mut stream, b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            AsyncReadExt::read_exact(&mut stream, &mut buf).await.unwrap();
            buf
        });

        let (mut conn, peer) = Listener::accept(&mut listener).await.unwrap();
        assert!(peer.starts_with("127.0.0.1:"));
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += conn.read(&mut buf[got..]).await.unwrap();
        }
        assert_eq!(&buf, b"ping");
        send_all(conn.as_mut(), b"pong").await.unwrap();

        assert_eq!(&client.await.unwrap(), b"pong");
    }
}
