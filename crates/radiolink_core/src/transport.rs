//! Contrato com o código de rádio e um enlace UDP que o implementa.
//!
//! O driver do rádio (frequência, potência, modulação) fica fora deste crate;
//! qualquer coisa que saiba `send` e `recv` com timeout serve. O
//! [`UdpTransport`] leva um frame de texto por datagrama e é o enlace usado
//! em bancada e nos testes.

use crate::config::LinkConfig;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::debug;

/// Tamanho máximo de datagrama UDP sem fragmentação.
pub const MAX_DATAGRAM: usize = 65507;

/// Erros de transporte. Sempre transitórios: alimentam o protocolo de backlog.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Falha de envio: {0}")]
    Send(String),

    #[error("Falha de recepção: {0}")]
    Recv(String),

    #[error("Timeout de envio após {0:?}")]
    Timeout(Duration),

    #[error("Endereço inválido {0:?}")]
    Address(String),

    #[error("Erro de socket: {0}")]
    Io(#[from] std::io::Error),
}

/// Enlace half-duplex: um frame por vez.
pub trait Transport {
    /// Envia um frame inteiro. `Err` significa que o frame não saiu.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Espera um frame por até `timeout`. `Ok(None)` é timeout.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

// ──────────────────────────────────────────────
// UDP
// ──────────────────────────────────────────────

pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    source_filter: Option<IpAddr>,
    send_timeout: Duration,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Cria o socket conforme `[*.link]`. `peer_addr` vazio = só recepção.
    pub fn bind(link: &LinkConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(link.bind_addr.as_str())?;
        let send_timeout = link.timeout();
        socket.set_write_timeout(Some(send_timeout))?;

        let peer = if link.peer_addr.is_empty() {
            None
        } else {
            Some(resolve(&link.peer_addr)?)
        };

        if link.broadcast {
            socket.set_broadcast(true)?;
        }

        Ok(Self {
            socket,
            peer,
            source_filter: None,
            send_timeout,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Aceita apenas frames vindos deste IP.
    pub fn with_source_filter(mut self, ip: Option<IpAddr>) -> Self {
        self.source_filter = ip;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let peer = self
            .peer
            .ok_or_else(|| TransportError::Send("nenhum peer configurado".into()))?;

        match self.socket.send_to(frame, peer) {
            Ok(sent) if sent == frame.len() => Ok(()),
            Ok(sent) => Err(TransportError::Send(format!(
                "envio parcial: {sent}/{} bytes",
                frame.len()
            ))),
            Err(e) if is_timeout(&e) => Err(TransportError::Timeout(self.send_timeout)),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        // Timeout zero é rejeitado pelo SO
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        match self.socket.recv_from(&mut self.buf) {
            Ok((size, addr)) => {
                if let Some(expected) = self.source_filter {
                    if addr.ip() != expected {
                        debug!("Ignorando frame de {} (esperado: {expected})", addr.ip());
                        return Ok(None);
                    }
                }
                Ok(Some(self.buf[..size].to_vec()))
            }
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(TransportError::Recv(e.to_string())),
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock
}

fn resolve(addr: &str) -> Result<SocketAddr, TransportError> {
    addr.to_socket_addrs()
        .map_err(|_| TransportError::Address(addr.to_string()))?
        .next()
        .ok_or_else(|| TransportError::Address(addr.to_string()))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn link(bind: &str, peer: &str) -> LinkConfig {
        LinkConfig {
            bind_addr: bind.into(),
            peer_addr: peer.into(),
            timeout_ms: 500,
            broadcast: false,
        }
    }

    #[test]
    fn udp_frame_roundtrip_on_loopback() {
        let mut rx = UdpTransport::bind(&link("127.0.0.1:0", "")).unwrap();
        let rx_addr = rx.local_addr().unwrap();
        let mut tx = UdpTransport::bind(&link("127.0.0.1:0", &rx_addr.to_string())).unwrap();

        tx.send(b"AAAAenvelope==").unwrap();
        let frame = rx.recv(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.as_deref(), Some(&b"AAAAenvelope=="[..]));
    }

    #[test]
    fn recv_timeout_is_none() {
        let mut rx = UdpTransport::bind(&link("127.0.0.1:0", "")).unwrap();
        assert!(rx.recv(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn send_without_peer_fails() {
        let mut tx = UdpTransport::bind(&link("127.0.0.1:0", "")).unwrap();
        assert!(matches!(tx.send(b"x"), Err(TransportError::Send(_))));
    }

    #[test]
    fn source_filter_drops_other_senders() {
        let rx = UdpTransport::bind(&link("127.0.0.1:0", "")).unwrap();
        let rx_addr = rx.local_addr().unwrap();
        let mut rx = rx.with_source_filter(Some("10.9.8.7".parse().unwrap()));
        let mut tx = UdpTransport::bind(&link("127.0.0.1:0", &rx_addr.to_string())).unwrap();

        tx.send(b"frame").unwrap();
        assert!(rx.recv(Duration::from_secs(1)).unwrap().is_none());
    }

    #[test]
    fn bad_peer_address_is_rejected() {
        assert!(matches!(
            UdpTransport::bind(&link("127.0.0.1:0", "sem-porta")),
            Err(TransportError::Address(_))
        ));
    }
}
