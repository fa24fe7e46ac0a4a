//! Thread de rádio que recebe frames e envia amostras para o consumidor via channel.

use crossbeam_channel::{Receiver, bounded};
use radiolink_core::receiver::{ReceiverStats, run_receive_loop};
use radiolink_core::{ReceivedFrame, ReceiverDecoder, Transport};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// Inicia a thread de recepção. Retorna o receiver do channel e o handle
/// que devolve as estatísticas quando o loop termina.
pub fn spawn_receiver_thread<T>(
    mut transport: T,
    decoder: ReceiverDecoder,
    capacity: usize,
    timeout: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<(Receiver<ReceivedFrame>, JoinHandle<ReceiverStats>)>
where
    T: Transport + Send + 'static,
{
    let (tx, rx) = bounded::<ReceivedFrame>(capacity);

    let handle = std::thread::Builder::new()
        .name("radio-receiver".into())
        .spawn(move || {
            info!("Thread de recepção iniciada (timeout {timeout:?})");
            // `tx` cai ao sair daqui e encerra o consumidor
            run_receive_loop(&mut transport, &decoder, &tx, &shutdown, timeout)
        })?;

    Ok((rx, handle))
}
