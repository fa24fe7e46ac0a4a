//! # Radiolink Sender
//!
//! Nó de campo: amostra os sensores a cada intervalo, cifra a amostra e
//! transmite pelo enlace. O que não sai fica no ledger e é reenviado,
//! do mais antigo para o mais novo, nos ciclos seguintes.
//!
//! ## Uso
//! ```bash
//! radiolink_sender                         # config.toml ao lado do executável
//! radiolink_sender --config /etc/node.toml
//! radiolink_sender --once                  # um único ciclo (diagnóstico)
//! ```

mod monitor;

use anyhow::{Context, Result, bail};
use clap::Parser;
use monitor::MockSensor;
use radiolink_core::config::AppConfig;
use radiolink_core::coordinator::{CoordinatorSettings, TransmissionCoordinator};
use radiolink_core::counter::CounterStore;
use radiolink_core::{
    DeviceIdentity, EnvelopeKey, FileLedger, RetryLedger, SystemHost, TelemetryCodec,
    UdpTransport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "radiolink_sender", version, about = "Sender do enlace de telemetria cifrada")]
struct Args {
    /// Caminho do config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Executa um único ciclo e sai
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    // ── Carregar config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate_sender();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        bail!("Configuração do sender inválida ({} erro(s))", errors.len());
    }
    let cfg = &config.sender;

    // ── Erros de configuração são fatais aqui ──
    let key = EnvelopeKey::load(Path::new(&cfg.key_file)).context("Keyfile inválido")?;
    let identity = DeviceIdentity::resolve(&SystemHost, &cfg.identity)
        .context("Não foi possível derivar a identidade do nó")?;
    let codec = TelemetryCodec::with_key(key, cfg.plaintext_format);
    let ledger = FileLedger::open(&cfg.ledger_file)
        .with_context(|| format!("Ledger {} inacessível", cfg.ledger_file))?;
    let backlog = ledger.len();
    let transport = UdpTransport::bind(&cfg.link)
        .with_context(|| format!("Falha ao abrir enlace em {}", cfg.link.bind_addr))?;

    let mut coordinator = TransmissionCoordinator::new(
        identity,
        codec,
        transport,
        ledger,
        MockSensor::new(cfg.mock.clone()),
        CoordinatorSettings::from_config(cfg),
    );
    if let Some(path) = cfg.counter_path() {
        coordinator = coordinator
            .with_counter_store(CounterStore::new(&path))
            .with_context(|| format!("Contador {} ilegível", path.display()))?;
    }

    // ── Sinais: termina o ciclo em andamento e sai ──
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Falha ao registrar handler de sinal")?;
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📡 RADIOLINK SENDER – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Device id: {}", coordinator.identity());
    println!("  Destino:   {}", cfg.link.peer_addr);
    println!("  Intervalo: {:.1}s", cfg.interval_secs);
    println!("  Grammar:   {:?}", cfg.plaintext_format);
    println!("  Backlog:   {backlog} entrada(s)");
    println!("══════════════════════════════════════════════");
    println!();

    if args.once {
        let report = coordinator.run_cycle()?;
        info!("Ciclo único: {report:?}");
        return Ok(());
    }

    coordinator.run(&shutdown)?;
    Ok(())
}
