//! Lado receptor: frames do rádio → amostras validadas → consumidor.
//!
//! Um frame corrompido ou cifrado com outra chave nunca derruba o loop:
//! o erro é logado, o frame descartado e a recepção continua.

use crate::protocol::{CodecError, TelemetryCodec};
use crate::transport::Transport;
use crate::types::TelemetrySample;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pausa depois de um erro de recepção, para não girar em falso.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Espelho do codec no receptor, com a validação mínima da amostra.
#[derive(Debug, Clone)]
pub struct ReceiverDecoder {
    codec: TelemetryCodec,
}

impl ReceiverDecoder {
    pub fn new(codec: TelemetryCodec) -> Self {
        Self { codec }
    }

    /// Decodifica um frame cru. Amostra sem `device_id` é `FieldParse`.
    pub fn decode(&self, raw: &[u8]) -> Result<TelemetrySample, CodecError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| CodecError::MalformedEnvelope(format!("frame não é texto: {e}")))?;
        let sample = self.codec.decode(text)?;
        if !sample.has_identity() {
            return Err(CodecError::FieldParse("device_id ausente".into()));
        }
        Ok(sample)
    }
}

/// Mensagem enviada da thread de rádio para o consumidor.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub sample: TelemetrySample,
    pub raw_size: usize,
}

/// Contadores do loop de recepção.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub delivered: u64,
    pub dropped: u64,
    pub timeouts: u64,
    pub transport_errors: u64,
}

/// Recebe até `shutdown` ou até o consumidor desaparecer.
///
/// Cada iteração termina em no máximo `timeout`, então o sinal de parada é
/// atendido sem interromper uma recepção em andamento.
pub fn run_receive_loop<T: Transport>(
    transport: &mut T,
    decoder: &ReceiverDecoder,
    sink: &Sender<ReceivedFrame>,
    shutdown: &AtomicBool,
    timeout: Duration,
) -> ReceiverStats {
    let mut stats = ReceiverStats::default();

    while !shutdown.load(Ordering::SeqCst) {
        let raw = match transport.recv(timeout) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                stats.timeouts += 1;
                debug!("Aguardando dados...");
                continue;
            }
            Err(e) => {
                stats.transport_errors += 1;
                warn!("Erro de recepção: {e}");
                std::thread::sleep(RECV_ERROR_BACKOFF);
                continue;
            }
        };

        let sample = match decoder.decode(&raw) {
            Ok(sample) => sample,
            Err(e) => {
                stats.dropped += 1;
                warn!("Frame descartado ({} bytes): {e}", raw.len());
                continue;
            }
        };

        debug!("Frame #{} de {}", sample.count, sample.device_id);
        let frame = ReceivedFrame {
            sample,
            raw_size: raw.len(),
        };
        // Non-blocking: se o consumidor está lento, descarta
        match sink.try_send(frame) {
            Ok(()) => stats.delivered += 1,
            Err(TrySendError::Full(_)) => {
                stats.dropped += 1;
                debug!("Channel cheio, descartando amostra");
            }
            Err(TrySendError::Disconnected(_)) => {
                info!("Consumidor encerrado; parando recepção");
                break;
            }
        }
    }

    stats
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
