//! # Radiolink Core
//!
//! Crate compartilhada entre o nó sender e o gateway receiver do enlace de
//! rádio: envelope cifrado, identidade do nó, ledger de reenvio e a
//! coordenação do envio.
//!
//! ## Módulos
//! - [`types`] – Amostra de telemetria e leitura de sensores
//! - [`key`] – Chave AES-256 carregada do keyfile
//! - [`protocol`] – Envelope `base64(IV || AES-256-CBC)` e grammars do plaintext
//! - [`identity`] – Device id derivado do hardware
//! - [`ledger`] – Fila FIFO durável dos envelopes não enviados
//! - [`counter`] – Persistência opcional do contador
//! - [`transport`] – Contrato com o rádio + enlace UDP
//! - [`coordinator`] – Ciclo de envio e drenagem do backlog
//! - [`receiver`] – Decodificação e loop de recepção
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod key;
pub mod protocol;
pub mod identity;
pub mod ledger;
pub mod counter;
pub mod transport;
pub mod coordinator;
pub mod receiver;
pub mod config;

// Re-exports convenientes
pub use types::{SensorReading, TelemetrySample};
pub use key::{EnvelopeKey, KeyError};
pub use protocol::{CodecError, PlaintextFormat, TelemetryCodec};
pub use identity::{DeviceIdentity, IdentityError, SystemHost};
pub use ledger::{FileLedger, LedgerError, MemoryLedger, RetryLedger};
pub use transport::{Transport, TransportError, UdpTransport};
pub use coordinator::{CoordinatorSettings, SensorSource, TransmissionCoordinator};
pub use receiver::{ReceivedFrame, ReceiverDecoder, run_receive_loop};
pub use config::{AppConfig, ReceiverConfig, SenderConfig};
