//! TCP transport: dialing, proxy tunneling, and packet-level IO.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::constants::PACKET_HEADER_SIZE;
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketHeader};

use super::tls::TlsParams;

/// The socket behind a connection: plain TCP, TLS, or TLS renegotiated on
/// top of an established TLS session (server-requested mTLS).
#[derive(Debug)]
pub(crate) enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    TlsReneg(Box<TlsStream<TlsStream<TcpStream>>>),
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            NetStream::TlsReneg(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            NetStream::TlsReneg(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            NetStream::TlsReneg(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            NetStream::TlsReneg(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Packet-level transport over a (possibly TLS-wrapped) TCP stream.
#[derive(Debug)]
pub struct Transport {
    stream: Option<NetStream>,
    sdu: u32,
    large_sdu: bool,
}

impl Transport {
    /// Dial `host:port`, optionally tunneling through an HTTPS CONNECT proxy.
    pub async fn connect(
        host: &str,
        port: u16,
        proxy: Option<(&str, u16)>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let (dial_host, dial_port) = proxy.unwrap_or((host, port));
        let addr = format!("{dial_host}:{dial_port}");

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout(connect_timeout))??;
        stream.set_nodelay(true)?;

        let mut transport = Self {
            stream: Some(NetStream::Plain(stream)),
            sdu: crate::constants::connect::DEFAULT_SDU,
            large_sdu: false,
        };

        if proxy.is_some() {
            transport.establish_proxy_tunnel(host, port, connect_timeout).await?;
        }

        Ok(transport)
    }

    /// Issue the HTTP CONNECT verb and wait for the 200 status line.
    async fn establish_proxy_tunnel(
        &mut self,
        host: &str,
        port: u16,
        deadline: Duration,
    ) -> Result<()> {
        let request = format!("CONNECT {host}:{port} HTTP/1.0\r\n\r\n");
        let stream = self.stream_mut()?;
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        let read_status = timeout(deadline, async {
            while !response.ends_with(b"\r\n\r\n") {
                stream.read_exact(&mut byte).await?;
                response.push(byte[0]);
                if response.len() > 4096 {
                    break;
                }
            }
            Ok::<_, Error>(())
        })
        .await;
        match read_status {
            Err(_) => return Err(Error::Timeout(deadline)),
            Ok(r) => r?,
        }

        let status = String::from_utf8_lossy(&response);
        let ok = status
            .lines()
            .next()
            .map(|line| line.starts_with("HTTP/1.") && line.contains(" 200"))
            .unwrap_or(false);
        if !ok {
            return Err(Error::ProxyFailure(
                status.lines().next().unwrap_or("empty response").to_string(),
            ));
        }
        Ok(())
    }

    /// Wrap the plain socket in TLS (TCPS addresses, before CONNECT is sent).
    pub async fn wrap_tls(&mut self, host: &str, params: &TlsParams) -> Result<()> {
        let stream = match self.stream.take() {
            Some(NetStream::Plain(s)) => s,
            other => {
                self.stream = other;
                return Err(Error::Tls("socket already wrapped".into()));
            }
        };
        let connector = TlsConnector::from(params.connector_config()?);
        let tls = connector
            .connect(params.sni_name(host)?, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        self.stream = Some(NetStream::Tls(Box::new(tls)));
        Ok(())
    }

    /// Run a second handshake on top of the current TLS session. The server
    /// requests this through the TLS_RENEG flag on its ACCEPT packet when it
    /// wants client certificates after the first hello.
    pub async fn renegotiate_tls(&mut self, host: &str, params: &TlsParams) -> Result<()> {
        let stream = match self.stream.take() {
            Some(NetStream::Tls(s)) => *s,
            other => {
                self.stream = other;
                return Err(Error::Tls("renegotiation requires an established TLS session".into()));
            }
        };
        let connector = TlsConnector::from(params.connector_config()?);
        let tls = connector
            .connect(params.sni_name(host)?, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        self.stream = Some(NetStream::TlsReneg(Box::new(tls)));
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut NetStream> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Whether a socket is attached.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Negotiated SDU.
    pub fn sdu(&self) -> u32 {
        self.sdu
    }

    /// Adopt the SDU agreed during phase one.
    pub fn set_sdu(&mut self, sdu: u32) {
        self.sdu = sdu;
    }

    /// Whether packet headers use the 4-byte length field.
    pub fn large_sdu(&self) -> bool {
        self.large_sdu
    }

    /// Switch the header length encoding.
    pub fn set_large_sdu(&mut self, large: bool) {
        self.large_sdu = large;
    }

    /// Send one finished packet.
    pub async fn send_packet(&mut self, packet: Bytes) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(&packet).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Send a request's packets, flushing once at the end.
    pub async fn send_packets(&mut self, packets: &[Bytes]) -> Result<()> {
        let stream = self.stream_mut()?;
        for p in packets {
            stream.write_all(p).await?;
        }
        stream.flush().await?;
        Ok(())
    }

    /// Send the out-of-band probe byte. Urgent-flag delivery is unavailable
    /// in cooperative mode, so the byte goes in-band; servers treat the
    /// probe as advisory.
    pub async fn send_oob_probe(&mut self) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(b"!").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Receive one packet, header plus payload.
    pub async fn receive_packet(&mut self) -> Result<Packet> {
        let large_sdu = self.large_sdu;
        let stream = self.stream_mut()?;

        let mut header_bytes = [0u8; PACKET_HEADER_SIZE];
        read_fully(stream, &mut header_bytes).await?;
        let header = PacketHeader::parse(&header_bytes, large_sdu)?;

        let payload_len = header.payload_length();
        let payload = if payload_len > 0 {
            let mut buf = vec![0u8; payload_len];
            read_fully(stream, &mut buf).await?;
            Bytes::from(buf)
        } else {
            Bytes::new()
        };

        Ok(Packet::new(header, payload))
    }

    /// Shut the socket down.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    /// Drop the socket without the shutdown round trip. Used on force-close.
    pub fn abort(&mut self) {
        self.stream = None;
    }
}

async fn read_fully(stream: &mut NetStream, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(e)
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MarkerType;
    use tokio::net::TcpListener;

    async fn echo_server_once(response: Vec<u8>) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut received = vec![0u8; 64];
            let n = sock.read(&mut received).await.unwrap();
            received.truncate(n);
            sock.write_all(&response).await.unwrap();
            received
        });
        (format!("{}:{}", addr.ip(), addr.port()), handle)
    }

    #[tokio::test]
    async fn connect_and_round_trip_marker() {
        let reply = crate::packet::build_marker(MarkerType::Reset, false).to_vec();
        let (addr, server) = echo_server_once(reply).await;
        let (host, port) = addr.rsplit_once(':').unwrap();

        let mut transport = Transport::connect(
            host,
            port.parse().unwrap(),
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let marker = crate::packet::build_marker(MarkerType::Break, false);
        transport.send_packet(marker.clone()).await.unwrap();

        let packet = transport.receive_packet().await.unwrap();
        assert_eq!(packet.marker_type(), Some(MarkerType::Reset));

        let sent = server.await.unwrap();
        assert_eq!(sent, marker.to_vec());
    }

    #[tokio::test]
    async fn connect_timeout_fires() {
        // RFC 5737 TEST-NET address: packets go nowhere.
        let result = Transport::connect(
            "192.0.2.1",
            1521,
            None,
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout(_)) | Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn proxy_rejection_surfaces() {
        let (addr, _server) =
            echo_server_once(b"HTTP/1.0 403 Forbidden\r\n\r\n".to_vec()).await;
        let (host, port) = addr.rsplit_once(':').unwrap();
        let port: u16 = port.parse().unwrap();

        let result = Transport::connect(
            "db.internal",
            1521,
            Some((host, port)),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(Error::ProxyFailure(_))));
    }

    #[tokio::test]
    async fn proxy_accepts_tunnel() {
        let (addr, server) = echo_server_once(b"HTTP/1.1 200 OK\r\n\r\n".to_vec()).await;
        let (host, port) = addr.rsplit_once(':').unwrap();
        let port: u16 = port.parse().unwrap();

        let transport = Transport::connect(
            "db.internal",
            1521,
            Some((host, port)),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(transport.is_connected());

        let sent = server.await.unwrap();
        assert!(sent.starts_with(b"CONNECT db.internal:1521 HTTP/1.0\r\n"));
    }

    #[tokio::test]
    async fn peer_close_is_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut transport = Transport::connect(
            &addr.ip().to_string(),
            addr.port(),
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let result = transport.receive_packet().await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
