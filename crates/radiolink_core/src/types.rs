//! Definição da amostra de telemetria transmitida pelo enlace de rádio.
//!
//! Uma amostra é transitória: só a sua forma cifrada (envelope) chega a ser
//! persistida, e apenas quando o envio falha.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Leitura de sensores
// ──────────────────────────────────────────────

/// Valores numéricos lidos dos sensores em um ciclo.
///
/// Todos opcionais: implantações com grammar `kv` usam temperatura, umidade
/// e pH; as com grammar JSON usam pressão, bateria e RSSI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReading {
    /// Temperatura (°C)
    pub temperature: Option<f64>,
    /// Umidade relativa (%)
    pub humidity: Option<f64>,
    /// pH da água
    pub ph: Option<f64>,
    /// Pressão (hPa)
    pub pressure: Option<f64>,
    /// Tensão da bateria (V)
    pub battery: Option<f64>,
    /// RSSI do último pacote (dBm)
    pub rssi: Option<i32>,
}

// ──────────────────────────────────────────────
// Amostra completa
// ──────────────────────────────────────────────

/// Amostra de telemetria de um nó.
///
/// `count` cresce exatamente 1 por amostra construída, independente do
/// resultado da transmissão.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

impl TelemetrySample {
    /// Monta uma amostra a partir de uma leitura de sensores.
    pub fn from_reading(
        device_id: &str,
        count: u64,
        timestamp: DateTime<Utc>,
        reading: SensorReading,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            count,
            timestamp: Some(timestamp),
            temperature: reading.temperature,
            humidity: reading.humidity,
            ph: reading.ph,
            pressure: reading.pressure,
            battery: reading.battery,
            rssi: reading.rssi,
        }
    }

    /// `true` se a amostra carrega o identificador mínimo exigido pelo receptor.
    pub fn has_identity(&self) -> bool {
        !self.device_id.trim().is_empty()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
