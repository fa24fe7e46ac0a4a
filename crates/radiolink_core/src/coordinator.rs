//! Coordenação do envio: amostragem, cifragem, drenagem do backlog e
//! enfileiramento das falhas.
//!
//! Ciclo: `Idle → Sampling → Encoding → Sending → {Success, Failure} → Idle`
//!
//! 1. Lê os sensores e monta a amostra (o contador avança aqui)
//! 2. Drena o ledger do mais antigo para o mais novo; a primeira falha
//!    interrompe a drenagem e deixa essa entrada e as seguintes na fila
//! 3. Envia a amostra nova; se falhar, o envelope vai para o ledger
//!
//! O backlog sai antes da amostra nova para não ficar parado enquanto
//! chegam dados frescos. Nenhum envio é repetido dentro do mesmo ciclo.
//!
//! Um sinal de parada durante a drenagem encerra o ciclo depois do envio em
//! andamento: o resto do backlog fica na fila e a amostra nova vai para o
//! ledger sem ser transmitida.

use crate::config::SenderConfig;
use crate::counter::CounterStore;
use crate::identity::DeviceIdentity;
use crate::ledger::{LedgerError, RetryLedger};
use crate::protocol::TelemetryCodec;
use crate::transport::Transport;
use crate::types::{SensorReading, TelemetrySample};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Granularidade da espera entre ciclos ao checar o sinal de parada.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Fonte de leituras. A aquisição real fica fora deste crate.
pub trait SensorSource {
    fn read(&mut self) -> SensorReading;
}

/// Erros que interrompem o sender.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Ledger indisponível, garantia de entrega perdida: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Falha ao salvar contador em {path}: {source}")]
    Counter {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fase do ciclo atual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Sampling,
    Encoding,
    Sending,
    Success,
    Failure,
}

/// Resumo de um ciclo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Contador da amostra construída neste ciclo
    pub count: u64,
    /// Entradas do backlog entregues
    pub drained: usize,
    /// A drenagem parou numa falha
    pub drain_stalled: bool,
    /// A amostra nova foi entregue
    pub sent: bool,
    /// A amostra nova foi para o ledger
    pub queued: bool,
    /// A amostra nova foi descartada (maior que o frame do rádio ou falha de codec)
    pub discarded: bool,
    /// Tamanho do backlog ao fim do ciclo
    pub backlog: usize,
}

/// Parâmetros de temporização e limites do coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub interval: Duration,
    pub max_frame_bytes: usize,
    pub drain_spacing: Duration,
    pub cooldown_threshold: u32,
    pub cooldown_pause: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(cfg: &SenderConfig) -> Self {
        Self {
            interval: cfg.interval(),
            max_frame_bytes: cfg.max_frame_bytes,
            drain_spacing: cfg.drain_spacing(),
            cooldown_threshold: cfg.failure_cooldown.threshold,
            cooldown_pause: Duration::try_from_secs_f64(cfg.failure_cooldown.pause_secs)
                .unwrap_or(Duration::ZERO),
        }
    }
}

/// Dono do ledger, da identidade e do contador do nó.
pub struct TransmissionCoordinator<T, L, S> {
    identity: DeviceIdentity,
    counter: u64,
    counter_store: Option<CounterStore>,
    codec: TelemetryCodec,
    transport: T,
    ledger: L,
    sensor: S,
    settings: CoordinatorSettings,
    phase: CyclePhase,
    failure_streak: u32,
}

impl<T, L, S> TransmissionCoordinator<T, L, S>
where
    T: Transport,
    L: RetryLedger,
    S: SensorSource,
{
    pub fn new(
        identity: DeviceIdentity,
        codec: TelemetryCodec,
        transport: T,
        ledger: L,
        sensor: S,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            identity,
            counter: 0,
            counter_store: None,
            codec,
            transport,
            ledger,
            sensor,
            settings,
            phase: CyclePhase::Idle,
            failure_streak: 0,
        }
    }

    /// Retoma o contador salvo e passa a persisti-lo a cada amostra.
    pub fn with_counter_store(mut self, store: CounterStore) -> std::io::Result<Self> {
        self.counter = store.load()?;
        info!(
            "Contador retomado em {} ({})",
            self.counter,
            store.path().display()
        );
        self.counter_store = Some(store);
        Ok(self)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Valor que a próxima amostra vai receber.
    pub fn next_count(&self) -> u64 {
        self.counter
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!("Ciclo: {:?} → {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Contador persistido não pode voltar atrás num reinício: falha ao
    /// salvar é fatal, como no ledger.
    fn next_sample(&mut self) -> Result<TelemetrySample, CoordinatorError> {
        let reading = self.sensor.read();
        let sample =
            TelemetrySample::from_reading(self.identity.as_str(), self.counter, Utc::now(), reading);
        self.counter += 1;

        if let Some(store) = &self.counter_store {
            store
                .store(self.counter)
                .map_err(|source| CoordinatorError::Counter {
                    path: store.path().display().to_string(),
                    source,
                })?;
        }
        Ok(sample)
    }

    /// Executa um ciclo completo. Só falhas do ledger e do contador viram `Err`.
    pub fn run_cycle(&mut self) -> Result<CycleReport, CoordinatorError> {
        self.cycle(None)
    }

    fn cycle(&mut self, shutdown: Option<&AtomicBool>) -> Result<CycleReport, CoordinatorError> {
        let mut report = CycleReport::default();

        self.enter(CyclePhase::Sampling);
        let sample = self.next_sample()?;
        report.count = sample.count;

        self.enter(CyclePhase::Encoding);
        let envelope = match self.codec.encode(&sample) {
            Ok(env) if env.len() > self.settings.max_frame_bytes => {
                warn!(
                    "Envelope #{} com {} bytes excede o frame do rádio ({}); descartado",
                    sample.count,
                    env.len(),
                    self.settings.max_frame_bytes
                );
                None
            }
            Ok(env) => Some(env),
            Err(e) => {
                error!("Falha ao codificar amostra #{}: {e}", sample.count);
                None
            }
        };

        self.enter(CyclePhase::Sending);
        self.drain(&mut report, shutdown)?;
        let stopping = shutdown.is_some_and(|flag| flag.load(Ordering::SeqCst));

        match envelope {
            Some(envelope) if stopping => {
                info!("Parada solicitada; #{} guardada no ledger", sample.count);
                self.ledger.append(&envelope)?;
                report.queued = true;
            }
            Some(envelope) => match self.transport.send(envelope.as_bytes()) {
                Ok(()) => {
                    info!(
                        "→ #{} {} bytes | temp {:?} hum {:?} ph {:?}",
                        sample.count,
                        envelope.len(),
                        sample.temperature,
                        sample.humidity,
                        sample.ph
                    );
                    report.sent = true;
                    self.failure_streak = 0;
                }
                Err(e) => {
                    warn!("Envio de #{} falhou: {e}. Guardando no ledger", sample.count);
                    self.ledger.append(&envelope)?;
                    report.queued = true;
                    self.failure_streak += 1;
                }
            },
            None => report.discarded = true,
        }

        report.backlog = self.ledger.len();
        self.enter(if report.sent {
            CyclePhase::Success
        } else {
            CyclePhase::Failure
        });
        self.enter(CyclePhase::Idle);
        Ok(report)
    }

    fn drain(
        &mut self,
        report: &mut CycleReport,
        shutdown: Option<&AtomicBool>,
    ) -> Result<(), LedgerError> {
        let stopping = || shutdown.is_some_and(|flag| flag.load(Ordering::SeqCst));

        while let Some(entry) = self.ledger.peek_oldest() {
            if stopping() {
                info!(
                    "Parada solicitada; {} entrada(s) ficam no ledger",
                    self.ledger.len()
                );
                break;
            }
            match self.transport.send(entry.as_bytes()) {
                Ok(()) => {
                    self.ledger.remove_oldest()?;
                    report.drained += 1;
                    debug!(
                        "Reenviado do ledger: {}…",
                        entry.chars().take(24).collect::<String>()
                    );
                    match shutdown {
                        Some(flag) => sleep_unless(flag, self.settings.drain_spacing),
                        None => std::thread::sleep(self.settings.drain_spacing),
                    }
                }
                Err(e) => {
                    report.drain_stalled = true;
                    warn!(
                        "Reenvio do backlog falhou ({e}); {} entrada(s) ficam para o próximo ciclo",
                        self.ledger.len()
                    );
                    break;
                }
            }
        }

        if report.drained > 0 {
            info!("Backlog: {} entrada(s) reenviada(s)", report.drained);
        }
        Ok(())
    }

    /// Espera até o próximo ciclo, com a pausa extra após falhas seguidas.
    pub fn next_wait(&mut self, cycle_elapsed: Duration) -> Duration {
        let mut wait = self.settings.interval.saturating_sub(cycle_elapsed);
        let threshold = self.settings.cooldown_threshold;
        if threshold > 0 && self.failure_streak >= threshold {
            warn!(
                "{} falhas seguidas; pausando {:?} extra",
                self.failure_streak, self.settings.cooldown_pause
            );
            wait += self.settings.cooldown_pause;
            self.failure_streak = 0;
        }
        wait
    }

    /// Loop principal. Sai quando `shutdown` é sinalizado, sempre entre ciclos.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), CoordinatorError> {
        while !shutdown.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            let report = self.cycle(Some(shutdown))?;
            debug!("{report:?}");

            let wait = self.next_wait(cycle_start.elapsed());
            sleep_unless(shutdown, wait);
        }

        info!(
            "Sender encerrado | próxima amostra #{} | {} entrada(s) no ledger",
            self.counter,
            self.ledger.len()
        );
        Ok(())
    }
}

/// Dorme até `total` ou até o sinal de parada.
fn sleep_unless(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FileLedger, MemoryLedger};
    use crate::protocol::PlaintextFormat;
    use crate::transport::TransportError;
    use std::collections::HashSet;
    use std::sync::Arc;

    const KEY: [u8; 32] = [0x11; 32];

    /// Rádio falso: falha tudo quando `healthy` é falso, ou frames específicos.
    /// Com `stop_on_send`, sinaliza parada no primeiro envio.
    #[derive(Default)]
    struct ScriptedRadio {
        healthy: bool,
        reject: HashSet<Vec<u8>>,
        delivered: Vec<Vec<u8>>,
        attempts: usize,
        stop_on_send: Option<Arc<AtomicBool>>,
    }

    impl Transport for ScriptedRadio {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.attempts += 1;
            if let Some(flag) = &self.stop_on_send {
                flag.store(true, Ordering::SeqCst);
            }
            if !self.healthy || self.reject.contains(frame) {
                return Err(TransportError::Send("sem ACK".into()));
            }
            self.delivered.push(frame.to_vec());
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }
    }

    struct FixedSensor;

    impl SensorSource for FixedSensor {
        fn read(&mut self) -> SensorReading {
            SensorReading {
                temperature: Some(25.5),
                humidity: Some(60.0),
                ph: Some(7.0),
                ..Default::default()
            }
        }
    }

    struct BrokenLedger;

    impl RetryLedger for BrokenLedger {
        fn append(&self, _payload: &str) -> Result<(), LedgerError> {
            Err(LedgerError::Io {
                path: "/ro/unsent_data.log".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
        fn peek_oldest(&self) -> Option<String> {
            None
        }
        fn remove_oldest(&self) -> Result<(), LedgerError> {
            Ok(())
        }
        fn len(&self) -> usize {
            0
        }
    }

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            interval: Duration::from_secs(10),
            max_frame_bytes: 255,
            drain_spacing: Duration::ZERO,
            cooldown_threshold: 3,
            cooldown_pause: Duration::from_secs(30),
        }
    }

    fn codec() -> TelemetryCodec {
        TelemetryCodec::new(&KEY, PlaintextFormat::Kv).unwrap()
    }

    fn coordinator<L: RetryLedger>(
        ledger: L,
        healthy: bool,
    ) -> TransmissionCoordinator<ScriptedRadio, L, FixedSensor> {
        let radio = ScriptedRadio {
            healthy,
            ..Default::default()
        };
        TransmissionCoordinator::new(
            DeviceIdentity::new("node_ABC123").unwrap(),
            codec(),
            radio,
            ledger,
            FixedSensor,
            settings(),
        )
    }

    fn counts(frames: &[Vec<u8>]) -> Vec<u64> {
        let codec = codec();
        frames
            .iter()
            .map(|f| codec.decode(std::str::from_utf8(f).unwrap()).unwrap().count)
            .collect()
    }

    #[test]
    fn healthy_cycle_sends_fresh_sample() {
        let mut c = coordinator(MemoryLedger::new(), true);
        let report = c.run_cycle().unwrap();
        assert!(report.sent);
        assert!(!report.queued);
        assert_eq!(report.count, 0);
        assert_eq!(report.backlog, 0);
        assert_eq!(c.phase(), CyclePhase::Idle);

        let sample = codec()
            .decode(std::str::from_utf8(&c.transport_mut().delivered[0]).unwrap())
            .unwrap();
        assert_eq!(sample.device_id, "node_ABC123");
        assert_eq!(sample.temperature, Some(25.5));
        assert!(sample.timestamp.is_some());
    }

    #[test]
    fn counter_advances_regardless_of_outcome() {
        let mut c = coordinator(MemoryLedger::new(), false);
        c.run_cycle().unwrap();
        c.run_cycle().unwrap();
        c.transport_mut().healthy = true;
        c.run_cycle().unwrap();
        assert_eq!(c.next_count(), 3);
    }

    #[test]
    fn steady_failures_then_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::open(dir.path().join("unsent_data.log")).unwrap();
        let mut c = coordinator(ledger, false);

        for _ in 0..3 {
            let report = c.run_cycle().unwrap();
            assert!(report.queued);
        }
        assert_eq!(c.ledger().len(), 3);

        c.transport_mut().healthy = true;
        let report = c.run_cycle().unwrap();
        assert_eq!(report.drained, 3);
        assert!(!report.drain_stalled);
        assert!(report.sent);
        assert!(c.ledger().is_empty());

        // Backlog do mais antigo para o mais novo, depois a amostra fresca
        assert_eq!(counts(&c.transport_mut().delivered), [0, 1, 2, 3]);
    }

    #[test]
    fn drain_stops_at_first_failure() {
        let ledger = MemoryLedger::new();
        for p in ["A", "B", "C"] {
            ledger.append(p).unwrap();
        }
        let mut c = coordinator(ledger, true);
        c.transport_mut().reject.insert(b"B".to_vec());

        let report = c.run_cycle().unwrap();
        assert_eq!(report.drained, 1);
        assert!(report.drain_stalled);
        assert!(report.sent);
        assert_eq!(c.ledger().snapshot(), ["B", "C"]);

        // C não foi tentado: A, B (falhou) e a amostra nova
        let radio = c.transport_mut();
        assert_eq!(radio.attempts, 3);
        assert_eq!(radio.delivered[0], b"A");
    }

    #[test]
    fn drain_stall_leaves_exact_tail_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unsent_data.log");
        let ledger = FileLedger::open(&path).unwrap();
        for p in ["A", "B", "C"] {
            ledger.append(p).unwrap();
        }
        let mut c = coordinator(ledger, true);
        c.transport_mut().reject.insert(b"B".to_vec());

        let report = c.run_cycle().unwrap();
        assert_eq!(report.drained, 1);
        assert!(report.drain_stalled);
        assert!(report.sent);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "B\nC\n");
        assert_eq!(FileLedger::open(&path).unwrap().len(), 2);
    }

    #[test]
    fn shutdown_during_drain_keeps_rest_queued() {
        let ledger = MemoryLedger::new();
        for n in 0..20 {
            ledger.append(&format!("entrada-{n}")).unwrap();
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut c = coordinator(ledger, true);
        c.settings.drain_spacing = Duration::from_millis(100);
        c.transport_mut().stop_on_send = Some(Arc::clone(&shutdown));

        let started = Instant::now();
        c.run(&shutdown).unwrap();

        // Só o envio em andamento; nada de espaçamento nem da amostra nova
        assert_eq!(c.transport_mut().attempts, 1);
        assert!(started.elapsed() < Duration::from_millis(100));
        let left = c.ledger().snapshot();
        assert_eq!(left.len(), 20);
        assert_eq!(left[0], "entrada-1");
        assert_eq!(counts(&[left[19].clone().into_bytes()]), [0]);
        assert_eq!(c.next_count(), 1);
    }

    #[test]
    fn no_retry_within_a_cycle() {
        let mut c = coordinator(MemoryLedger::new(), false);
        c.run_cycle().unwrap();
        assert_eq!(c.transport_mut().attempts, 1);
        // Segundo ciclo: uma tentativa do backlog + uma da amostra nova
        c.run_cycle().unwrap();
        assert_eq!(c.transport_mut().attempts, 3);
    }

    #[test]
    fn oversize_envelope_is_discarded_not_queued() {
        let mut c = coordinator(MemoryLedger::new(), true);
        c.settings.max_frame_bytes = 64;
        let report = c.run_cycle().unwrap();
        assert!(report.discarded);
        assert!(!report.queued);
        assert!(c.ledger().is_empty());
        assert_eq!(c.next_count(), 1);
    }

    #[test]
    fn ledger_failure_is_fatal() {
        let mut c = coordinator(BrokenLedger, false);
        assert!(matches!(c.run_cycle(), Err(CoordinatorError::Ledger(_))));
    }

    #[test]
    fn cooldown_after_consecutive_failures() {
        let mut c = coordinator(MemoryLedger::new(), false);
        for _ in 0..2 {
            c.run_cycle().unwrap();
            assert_eq!(c.next_wait(Duration::ZERO), Duration::from_secs(10));
        }
        c.run_cycle().unwrap();
        assert_eq!(c.next_wait(Duration::ZERO), Duration::from_secs(40));
        // Streak zerada depois da pausa
        assert_eq!(c.next_wait(Duration::from_secs(4)), Duration::from_secs(6));
    }

    #[test]
    fn counter_store_resumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path().join("counter.txt"));
        store.store(100).unwrap();

        let mut c = coordinator(MemoryLedger::new(), true)
            .with_counter_store(store.clone())
            .unwrap();
        assert_eq!(c.run_cycle().unwrap().count, 100);
        assert_eq!(store.load().unwrap(), 101);
    }

    #[test]
    fn settings_tolerate_non_finite_pause() {
        let mut cfg = SenderConfig::default();
        cfg.failure_cooldown.pause_secs = f64::INFINITY;
        assert_eq!(CoordinatorSettings::from_config(&cfg).cooldown_pause, Duration::ZERO);
        cfg.failure_cooldown.pause_secs = 12.5;
        assert_eq!(
            CoordinatorSettings::from_config(&cfg).cooldown_pause,
            Duration::from_millis(12_500)
        );
    }

    #[test]
    fn counter_store_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        std::fs::create_dir(&state).unwrap();
        let mut c = coordinator(MemoryLedger::new(), true)
            .with_counter_store(CounterStore::new(state.join("counter.txt")))
            .unwrap();
        std::fs::remove_dir_all(&state).unwrap();

        assert!(matches!(
            c.run_cycle(),
            Err(CoordinatorError::Counter { .. })
        ));
        assert_eq!(c.transport_mut().attempts, 0);
    }

    #[test]
    fn run_exits_on_shutdown() {
        let mut c = coordinator(MemoryLedger::new(), true);
        let shutdown = AtomicBool::new(true);
        c.run(&shutdown).unwrap();
        assert_eq!(c.next_count(), 0);
    }
}
