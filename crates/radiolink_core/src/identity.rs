//! Identidade do nó sender.
//!
//! Derivada uma única vez no startup a partir do endereço de hardware e de
//! um prefixo configurado. O valor resultante é imutável pelo resto do
//! processo; quem precisa dele recebe uma referência explícita.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use sysinfo::{Networks, System};
use tracing::{debug, info};

/// Tamanho máximo aceito para um device id.
pub const MAX_ID_LEN: usize = 50;

/// Erros de identidade. Todos fatais no startup.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Endereço de hardware indisponível (nenhuma interface com MAC válido)")]
    HardwareAddressUnavailable,

    #[error("Device id inválido {0:?}: use até {MAX_ID_LEN} caracteres [A-Za-z0-9_-]")]
    InvalidId(String),
}

/// Método de derivação do id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdMethod {
    /// `prefixo + últimos 6 dígitos hex do MAC`
    #[default]
    Mac,
    /// `prefixo + serial da CPU` (fallback: MAC)
    Serial,
    /// `prefixo + serial + últimos 4 dígitos do MAC` (fallback: MAC)
    Hybrid,
    /// `prefixo + 8 hex do SHA-256(MAC, serial, hostname)`
    Hash,
    /// Id fixo da configuração (fallback: MAC)
    Config,
}

/// Configuração de identidade (seção `[sender.identity]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub method: IdMethod,
    pub prefix: String,
    /// Id fixo usado pelo método `config` (vazio = não definido)
    pub device_id: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            method: IdMethod::Mac,
            prefix: "node_".into(),
            device_id: String::new(),
        }
    }
}

// ──────────────────────────────────────────────
// Fonte de informação do host
// ──────────────────────────────────────────────

/// Estado do host usado na derivação. Testes injetam valores fixos.
pub trait HostInfo {
    fn mac_address(&self) -> Option<[u8; 6]>;
    fn cpu_serial(&self) -> Option<String>;
    fn hostname(&self) -> Option<String>;
}

/// Implementação real: interfaces via `sysinfo`, serial via `/proc/cpuinfo`.
pub struct SystemHost;

impl HostInfo for SystemHost {
    fn mac_address(&self) -> Option<[u8; 6]> {
        let networks = Networks::new_with_refreshed_list();
        let mut candidates: Vec<(&String, [u8; 6])> = networks
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .map(|(name, data)| (name, data.mac_address().0))
            .filter(|(_, mac)| mac.iter().any(|b| *b != 0))
            .collect();
        // Ordem estável entre execuções
        candidates.sort_by(|a, b| a.0.cmp(b.0));
        let (name, mac) = candidates.first()?;
        debug!("MAC de {name}: {}", mac_hex(mac));
        Some(*mac)
    }

    fn cpu_serial(&self) -> Option<String> {
        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        parse_cpu_serial(&cpuinfo)
    }

    fn hostname(&self) -> Option<String> {
        System::host_name()
    }
}

fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("Serial"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let chars: Vec<char> = s.chars().collect();
            chars[chars.len().saturating_sub(8)..].iter().collect()
        })
}

fn mac_hex(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{b:02X}")).collect()
}

// ──────────────────────────────────────────────
// Identidade
// ──────────────────────────────────────────────

/// Identificador estável do nó.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Deriva a identidade conforme o método configurado.
    pub fn resolve(host: &dyn HostInfo, config: &IdentityConfig) -> Result<Self, IdentityError> {
        let prefix = config.prefix.as_str();
        let id = match config.method {
            IdMethod::Mac => mac_id(host, prefix)?,
            IdMethod::Serial => match host.cpu_serial() {
                Some(serial) => format!("{prefix}{serial}"),
                None => mac_id(host, prefix)?,
            },
            IdMethod::Hybrid => match host.cpu_serial() {
                Some(serial) => {
                    let mac = mac_hex(&require_mac(host)?);
                    format!("{prefix}{serial}{}", &mac[mac.len() - 4..])
                }
                None => mac_id(host, prefix)?,
            },
            IdMethod::Hash => {
                let mac = mac_hex(&require_mac(host)?);
                let serial = host.cpu_serial().unwrap_or_else(|| "unknown".into());
                let hostname = host.hostname().unwrap_or_else(|| "unknown".into());
                let digest = Sha256::digest(format!("{mac}{serial}{hostname}").as_bytes());
                let hex: String = digest[..4].iter().map(|b| format!("{b:02X}")).collect();
                format!("{prefix}{hex}")
            }
            IdMethod::Config if !config.device_id.is_empty() => config.device_id.clone(),
            IdMethod::Config => mac_id(host, prefix)?,
        };

        let identity = Self::new(id)?;
        info!("Device id: {} (método {:?})", identity, config.method);
        Ok(identity)
    }

    /// Valida um id já pronto.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if is_valid_id(&id) {
            Ok(Self(id))
        } else {
            Err(IdentityError::InvalidId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id não vazio, até 50 caracteres, só `[A-Za-z0-9_-]`.
///
/// O conjunto restrito também garante que o id não quebra a grammar `kv`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn require_mac(host: &dyn HostInfo) -> Result<[u8; 6], IdentityError> {
    host.mac_address()
        .ok_or(IdentityError::HardwareAddressUnavailable)
}

fn mac_id(host: &dyn HostInfo, prefix: &str) -> Result<String, IdentityError> {
    let mac = mac_hex(&require_mac(host)?);
    Ok(format!("{prefix}{}", &mac[mac.len() - 6..]))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
