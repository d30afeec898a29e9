//! The framed link: a TCP stream that exchanges whole length-prefixed UTF-8
//! frames. Mirrors the source's `net::Link`/`net::Listener` split, but uses
//! `TcpStream::try_clone` to give the send and receive loops their own
//! handles instead of needing a lock shared across a blocking call.

use crate::error::{ErrorKind, NetError, NetResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// How long a read/write of the body of a frame is allowed to spin-wait for
/// the rest of the data to arrive before giving up as a broken pipe.
const FRAME_WAIT_BUDGET: Duration = Duration::from_secs(5);
const FRAME_WAIT_STEP: Duration = Duration::from_millis(5);

/// A bidirectional, length-prefixed-frame endpoint over a TCP connection.
pub struct Link {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    online: AtomicBool,
    peer: String,
}

impl Link {
    /// Opens a new connection to `host:port`.
    pub fn open(host: &str, port: u16) -> NetResult<Link> {
        let stream = TcpStream::connect((host, port))?;
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| host.to_string());
        Link::from_stream(stream, peer)
    }

    /// Wraps an already-connected stream, as produced by [`Listener::accept`].
    pub(crate) fn from_stream(stream: TcpStream, peer: String) -> NetResult<Link> {
        stream.set_nonblocking(true)?;
        let writer = stream.try_clone()?;
        Ok(Link {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            online: AtomicBool::new(true),
            peer,
        })
    }

    /// Closes the link. Idempotent.
    pub fn close(&self) {
        if self.online.swap(false, Ordering::SeqCst) {
            let _ = self.reader.lock().unwrap().shutdown(std::net::Shutdown::Both);
        }
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn peer_address(&self) -> &str {
        &self.peer
    }

    /// Non-blocking readability poll: true if at least one byte is waiting to
    /// be read. A graceful peer shutdown (zero-byte peek) closes the link and
    /// is reported as `Ok(false)` rather than `Ok(true)`, since there is
    /// nothing left for `read_frame` to read.
    pub fn is_ready(&self) -> NetResult<bool> {
        if !self.is_online() {
            return Ok(false);
        }
        let mut probe = [0u8; 1];
        let stream = self.reader.lock().unwrap();
        match stream.peek(&mut probe) {
            Ok(0) => {
                drop(stream);
                self.close();
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => {
                drop(stream);
                self.close();
                Err(e.into())
            }
        }
    }

    /// Writes one frame: a 2-byte big-endian length prefix followed by the
    /// UTF-8 bytes of `text`. Rejects payloads that would not fit in 16 bits
    /// rather than truncating them.
    pub fn write_frame(&self, text: &str) -> NetResult<()> {
        let bytes = text.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(NetError::new(
                ErrorKind::PayloadTooLarge,
                format!("frame is {} bytes, limit is {}", bytes.len(), u16::MAX),
            ));
        }
        let result = (|| -> io::Result<()> {
            let mut stream = self.writer.lock().unwrap();
            stream.write_u16::<BigEndian>(bytes.len() as u16)?;
            stream.write_all(bytes)?;
            stream.flush()
        })();
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    /// Reads one whole frame. Must only be called when [`Link::is_ready`]
    /// returned `true`; spins with a short sleep until the body has fully
    /// arrived, per the framing tie-break.
    pub fn read_frame(&self) -> NetResult<String> {
        match self.read_frame_inner() {
            Ok(text) => Ok(text),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn read_frame_inner(&self) -> NetResult<String> {
        let len = self.read_exact_with_wait(2).map(|buf| (&buf[..]).read_u16::<BigEndian>().unwrap())?;
        let body = self.read_exact_with_wait(len as usize)?;
        String::from_utf8(body).map_err(|e| NetError::new(ErrorKind::Decode, e.to_string()))
    }

    /// Reads exactly `count` bytes, spin-waiting on `WouldBlock` up to
    /// [`FRAME_WAIT_BUDGET`]. A zero-byte read (peer shut down mid-frame) is
    /// a broken pipe, not a short frame.
    fn read_exact_with_wait(&self, count: usize) -> NetResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        let mut filled = 0;
        let waited = std::time::Instant::now();

        while filled < count {
            let mut stream = self.reader.lock().unwrap();
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(NetError::broken_pipe("connection closed mid-frame"));
                }
                Ok(n) => {
                    filled += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    drop(stream);
                    if waited.elapsed() > FRAME_WAIT_BUDGET {
                        return Err(NetError::broken_pipe("timed out waiting for frame body"));
                    }
                    thread::sleep(FRAME_WAIT_STEP);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }
}

/// A non-blocking TCP listener producing [`Link`]s.
pub struct Listener {
    inner: Mutex<Option<TcpListener>>,
}

impl Listener {
    /// Starts listening on the given local port, on all interfaces.
    pub fn open(port: u16) -> NetResult<Listener> {
        Listener::open_addr(("0.0.0.0", port))
    }

    pub fn open_addr<A: ToSocketAddrs>(addr: A) -> NetResult<Listener> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Listener { inner: Mutex::new(Some(listener)) })
    }

    /// Builds a `Listener` that isn't bound to anything yet; [`Listener::bind`]
    /// puts it online. Lets a long-lived owner hold a `Listener` across
    /// repeated start/shutdown cycles without rebuilding the wrapper.
    pub(crate) fn unbound() -> Listener {
        Listener { inner: Mutex::new(None) }
    }

    /// Binds (or rebinds) this listener to `port`. Replaces whatever socket
    /// it held before, if any.
    pub(crate) fn bind(&self, port: u16) -> NetResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        *self.inner.lock().unwrap() = Some(listener);
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// The local port actually bound, useful when opening on port 0 to let
    /// the OS pick an ephemeral one (as the tests here do).
    pub fn local_port(&self) -> Option<u16> {
        self.inner.lock().unwrap().as_ref().and_then(|l| l.local_addr().ok()).map(|a| a.port())
    }

    /// Stops listening. Idempotent.
    pub fn close(&self) {
        self.inner.lock().unwrap().take();
    }

    /// Accepts a new connection, or returns `Ok(None)` if none is pending.
    pub fn accept(&self) -> NetResult<Option<Link>> {
        let guard = self.inner.lock().unwrap();
        let listener = match guard.as_ref() {
            Some(listener) => listener,
            None => return Ok(None),
        };
        match listener.accept() {
            Ok((stream, addr)) => {
                drop(guard);
                Ok(Some(Link::from_stream(stream, addr.to_string())?))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_blocking(listener: &Listener) -> Link {
        loop {
            if let Some(link) = listener.accept().unwrap() {
                return link;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn write_then_read_round_trips_a_frame() {
        let listener = Listener::open(0).unwrap();
        let port = listener.local_port().unwrap();

        let client = thread::spawn(move || Link::open("127.0.0.1", port).unwrap());
        let server_side = accept_blocking(&listener);
        let client_side = client.join().unwrap();

        server_side.write_frame("hello").unwrap();
        loop {
            if client_side.is_ready().unwrap() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client_side.read_frame().unwrap(), "hello");
    }

    #[test]
    fn write_frame_rejects_oversized_payload() {
        let listener = Listener::open(0).unwrap();
        let port = listener.local_port().unwrap();
        let client = thread::spawn(move || Link::open("127.0.0.1", port).unwrap());
        let _server_side = accept_blocking(&listener);
        let client_side = client.join().unwrap();

        let huge = "x".repeat(u16::MAX as usize + 1);
        let err = client_side.write_frame(&huge).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn closing_the_link_marks_it_offline() {
        let listener = Listener::open(0).unwrap();
        let port = listener.local_port().unwrap();
        let client = thread::spawn(move || Link::open("127.0.0.1", port).unwrap());
        let _server_side = accept_blocking(&listener);
        let client_side = client.join().unwrap();

        assert!(client_side.is_online());
        client_side.close();
        assert!(!client_side.is_online());
    }
}
