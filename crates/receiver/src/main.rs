//! # Radiolink Receiver
//!
//! Gateway do enlace: recebe os frames, decifra, valida e entrega as
//! amostras ao consumidor. Frames corrompidos ou de outra chave são
//! logados e descartados sem interromper a recepção.
//!
//! ## Uso
//! ```bash
//! radiolink_receiver                          # log das amostras
//! radiolink_receiver --jsonl >> amostras.jsonl
//! ```

mod net_thread;

use anyhow::{Context, Result, bail};
use clap::Parser;
use radiolink_core::config::AppConfig;
use radiolink_core::{EnvelopeKey, ReceiverDecoder, TelemetryCodec, UdpTransport};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "radiolink_receiver", version, about = "Receiver do enlace de telemetria cifrada")]
struct Args {
    /// Caminho do config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Escreve cada amostra como uma linha JSON em stdout
    #[arg(long)]
    jsonl: bool,
}

fn main() -> Result<()> {
    // ── Logging (stderr, stdout fica livre para --jsonl) ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // ── Config ──
    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate_receiver();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        bail!("Configuração do receiver inválida ({} erro(s))", errors.len());
    }
    let cfg = &config.receiver;

    let key = EnvelopeKey::load(Path::new(&cfg.key_file)).context("Keyfile inválido")?;
    let decoder = ReceiverDecoder::new(TelemetryCodec::with_key(key, cfg.plaintext_format));

    let sender_ip: Option<IpAddr> = if cfg.sender_ip.is_empty() {
        None
    } else {
        Some(cfg.sender_ip.parse().context("sender_ip inválido")?)
    };
    let transport = UdpTransport::bind(&cfg.link)
        .with_context(|| format!("Falha ao escutar em {}", cfg.link.bind_addr))?
        .with_source_filter(sender_ip);

    // ── Sinais ──
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Falha ao registrar handler de sinal")?;
    }

    let mode = sender_ip.map_or_else(|| "qualquer origem".to_string(), |ip| ip.to_string());
    info!(
        "Receiver escutando em {} – Origem: {mode} – Grammar: {:?}",
        cfg.link.bind_addr, cfg.plaintext_format
    );

    let (rx, handle) = net_thread::spawn_receiver_thread(
        transport,
        decoder,
        cfg.channel_capacity,
        cfg.link.timeout(),
        Arc::clone(&shutdown),
    )
    .context("Falha ao criar thread de rádio")?;

    // ── Consumidor: termina quando a thread de rádio fecha o channel ──
    for frame in rx.iter() {
        let s = &frame.sample;
        if args.jsonl {
            match serde_json::to_string(s) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Falha ao serializar amostra: {e}"),
            }
        } else {
            info!(
                "← {} #{} ({} bytes) | temp {:?} hum {:?} ph {:?} | pres {:?} bat {:?} rssi {:?}",
                s.device_id,
                s.count,
                frame.raw_size,
                s.temperature,
                s.humidity,
                s.ph,
                s.pressure,
                s.battery,
                s.rssi
            );
        }
    }

    match handle.join() {
        Ok(stats) => info!(
            "Receiver encerrado | entregues {} | descartados {} | timeouts {} | erros {}",
            stats.delivered, stats.dropped, stats.timeouts, stats.transport_errors
        ),
        Err(_) => bail!("Thread de rádio terminou em pânico"),
    }
    Ok(())
}
