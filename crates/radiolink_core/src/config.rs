//! Configuração unificada via TOML.
//!
//! Um único `config.toml` com as seções `[sender]` e `[receiver]`. Campos
//! ausentes assumem o valor padrão.

use crate::identity::{IdMethod, IdentityConfig, is_valid_id};
use crate::protocol::PlaintextFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Menor envelope possível: base64 de IV + um bloco (32 bytes).
const MIN_FRAME_BYTES: usize = 44;

/// Parâmetros do enlace repassados ao transporte.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Endereço local do socket
    pub bind_addr: String,
    /// Destino dos frames (vazio = só recepção)
    pub peer_addr: String,
    /// Timeout de envio/recepção (ms)
    pub timeout_ms: u64,
    /// Habilita envio para endereço de broadcast
    pub broadcast: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".into(),
            peer_addr: "127.0.0.1:5005".into(),
            timeout_ms: 2000,
            broadcast: false,
        }
    }
}

impl LinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Valores fixos do sensor simulado.
///
/// Pressão, bateria e RSSI só entram na amostra quando definidos (grammar JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSensorConfig {
    pub temperature: f64,
    pub humidity: f64,
    pub ph: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    /// Variação aleatória máxima (±) aplicada a cada leitura
    pub jitter: f64,
}

impl Default for MockSensorConfig {
    fn default() -> Self {
        Self {
            temperature: 25.5,
            humidity: 60.0,
            ph: 7.0,
            pressure: None,
            battery: None,
            rssi: None,
            jitter: 0.0,
        }
    }
}

/// Pausa extra depois de falhas consecutivas do envio da amostra nova.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureCooldown {
    /// Ciclos com falha seguidos até a pausa (0 = desativado)
    pub threshold: u32,
    /// Duração da pausa (segundos)
    pub pause_secs: f64,
}

impl Default for FailureCooldown {
    fn default() -> Self {
        Self {
            threshold: 3,
            pause_secs: 30.0,
        }
    }
}

/// Configuração do Sender (nó de campo).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Intervalo entre ciclos em segundos
    pub interval_secs: f64,
    /// Keyfile com 32 bytes crus
    pub key_file: String,
    /// Ledger de envelopes não enviados
    pub ledger_file: String,
    /// Persistência do contador (vazio = contador recomeça em 0)
    pub counter_file: String,
    /// Grammar do plaintext: "kv" ou "json"
    pub plaintext_format: PlaintextFormat,
    /// Maior frame que o rádio aceita
    pub max_frame_bytes: usize,
    /// Pausa entre reenvios do backlog (ms)
    pub drain_spacing_ms: u64,
    pub identity: IdentityConfig,
    pub link: LinkConfig,
    pub mock: MockSensorConfig,
    pub failure_cooldown: FailureCooldown,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10.0,
            key_file: "keyfile.bin".into(),
            ledger_file: "unsent_data.log".into(),
            counter_file: String::new(),
            plaintext_format: PlaintextFormat::Kv,
            max_frame_bytes: 255,
            drain_spacing_ms: 500,
            identity: IdentityConfig::default(),
            link: LinkConfig::default(),
            mock: MockSensorConfig::default(),
            failure_cooldown: FailureCooldown::default(),
        }
    }
}

impl SenderConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn drain_spacing(&self) -> Duration {
        Duration::from_millis(self.drain_spacing_ms)
    }

    pub fn counter_path(&self) -> Option<PathBuf> {
        (!self.counter_file.is_empty()).then(|| PathBuf::from(&self.counter_file))
    }
}

/// Configuração do Receiver (gateway).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub key_file: String,
    pub plaintext_format: PlaintextFormat,
    /// IP do sender (vazio = aceita qualquer origem)
    pub sender_ip: String,
    /// Capacidade do channel entre a thread de rádio e o consumidor
    pub channel_capacity: usize,
    pub link: LinkConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            key_file: "keyfile.bin".into(),
            plaintext_format: PlaintextFormat::Kv,
            sender_ip: String::new(),
            channel_capacity: 64,
            link: LinkConfig {
                bind_addr: "0.0.0.0:5005".into(),
                peer_addr: String::new(),
                timeout_ms: 10_000,
                broadcast: false,
            },
        }
    }
}

/// Configuração raiz do aplicativo (unifica sender e receiver).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.validate_sender();
        errors.extend(self.validate_receiver());
        errors
    }

    /// Erros da seção `[sender]`.
    pub fn validate_sender(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let s = &self.sender;

        if !(0.1..=3600.0).contains(&s.interval_secs) {
            errors.push(format!(
                "Intervalo do sender inválido: {} (0.1–3600.0)",
                s.interval_secs
            ));
        }
        if s.key_file.is_empty() {
            errors.push("Keyfile do sender não definido".into());
        }
        if s.ledger_file.is_empty() {
            errors.push("Arquivo de ledger não definido".into());
        }
        if s.max_frame_bytes < MIN_FRAME_BYTES {
            errors.push(format!(
                "max_frame_bytes {} menor que o menor envelope ({MIN_FRAME_BYTES})",
                s.max_frame_bytes
            ));
        }
        if s.link.timeout_ms == 0 {
            errors.push("Timeout do enlace do sender não pode ser 0".into());
        }
        if s.link.peer_addr.is_empty() {
            errors.push("Sender sem peer_addr".into());
        }
        // TOML aceita inf e nan
        let pause = s.failure_cooldown.pause_secs;
        if !pause.is_finite() || pause < 0.0 {
            errors.push(format!("Pausa de falhas inválida: {pause}"));
        }
        let mock = &s.mock;
        if !mock.jitter.is_finite() || mock.jitter < 0.0 {
            errors.push(format!("Jitter do sensor simulado inválido: {}", mock.jitter));
        }
        let readings = [
            ("temperature", Some(mock.temperature)),
            ("humidity", Some(mock.humidity)),
            ("ph", Some(mock.ph)),
            ("pressure", mock.pressure),
            ("battery", mock.battery),
        ];
        for (name, value) in readings {
            if let Some(v) = value.filter(|v| !v.is_finite()) {
                errors.push(format!("Valor simulado {name} não é finito: {v}"));
            }
        }
        if !s.identity.prefix.is_empty() && !is_valid_id(&s.identity.prefix) {
            errors.push(format!("Prefixo de id inválido: {:?}", s.identity.prefix));
        }
        if s.identity.method == IdMethod::Config
            && !s.identity.device_id.is_empty()
            && !is_valid_id(&s.identity.device_id)
        {
            errors.push(format!("Device id inválido: {:?}", s.identity.device_id));
        }

        errors
    }

    /// Erros da seção `[receiver]`.
    pub fn validate_receiver(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let r = &self.receiver;
        if r.key_file.is_empty() {
            errors.push("Keyfile do receiver não definido".into());
        }
        if r.link.timeout_ms == 0 {
            errors.push("Timeout do enlace do receiver não pode ser 0".into());
        }
        if r.channel_capacity == 0 {
            errors.push("channel_capacity do receiver não pode ser 0".into());
        }
        if !r.sender_ip.is_empty() && r.sender_ip.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("sender_ip inválido: {:?}", r.sender_ip));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.sender.interval_secs, parsed.sender.interval_secs);
        assert_eq!(config.receiver.link.bind_addr, parsed.receiver.link.bind_addr);
        assert_eq!(parsed.sender.plaintext_format, PlaintextFormat::Kv);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[sender]
interval_secs = 5.0
plaintext_format = "json"

[sender.identity]
method = "hybrid"
prefix = "sonda_"
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.sender.interval_secs, 5.0);
        assert_eq!(config.sender.plaintext_format, PlaintextFormat::Json);
        assert_eq!(config.sender.identity.method, IdMethod::Hybrid);
        assert_eq!(config.sender.identity.prefix, "sonda_");
        // Outros campos devem ter valor padrão
        assert_eq!(config.sender.max_frame_bytes, 255);
        assert_eq!(config.receiver.link.bind_addr, "0.0.0.0:5005");
        assert!(config.sender.counter_path().is_none());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = AppConfig::default();
        config.sender.interval_secs = 0.0;
        config.sender.max_frame_bytes = 10;
        config.sender.identity.prefix = "nó,1".into();
        config.receiver.channel_capacity = 0;
        config.receiver.sender_ip = "não-é-ip".into();
        assert_eq!(config.validate_sender().len(), 3);
        assert_eq!(config.validate_receiver().len(), 2);
        assert_eq!(config.validate().len(), 5);
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let text = r#"
[sender.mock]
temperature = nan
jitter = nan
pressure = -inf

[sender.failure_cooldown]
pause_secs = inf
"#;
        let config: AppConfig = toml::from_str(text).unwrap();
        let errors = config.validate_sender();
        assert_eq!(errors.len(), 4, "Erros: {errors:?}");

        let mut config = AppConfig::default();
        config.sender.mock.jitter = -1.0;
        config.sender.mock.humidity = f64::INFINITY;
        config.sender.mock.ph = f64::NAN;
        config.sender.mock.battery = Some(f64::NAN);
        assert_eq!(config.validate_sender().len(), 4);
    }

    #[test]
    fn mock_optional_fields_roundtrip() {
        let mut config = AppConfig::default();
        config.sender.mock.pressure = Some(1013.25);
        config.sender.mock.rssi = Some(-90);
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("battery"));
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.sender.mock.pressure, Some(1013.25));
        assert_eq!(parsed.sender.mock.rssi, Some(-90));
        assert!(parsed.sender.mock.battery.is_none());
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("config.toml"));
        assert_eq!(config.sender.ledger_file, "unsent_data.log");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.sender.counter_file = "counter.txt".into();
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.sender.counter_path(), Some(PathBuf::from("counter.txt")));
    }
}
