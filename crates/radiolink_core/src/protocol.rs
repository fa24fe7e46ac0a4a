//! Protocolo do envelope cifrado transmitido pelo rádio.
//!
//! Formato do frame (uma linha de texto):
//!
//! ```text
//! base64( ┌─────────┬──────────────────────────────┐ )
//!         │ IV (16) │ AES-256-CBC(PKCS#7(plain)) N │
//!         └─────────┴──────────────────────────────┘
//! ```
//!
//! - IV aleatório novo a cada `encode` (nunca reutilizado sob a mesma chave)
//! - Plaintext em uma das grammars de [`PlaintextFormat`]
//! - Só confidencialidade: não há tag de integridade

use crate::key::{EnvelopeKey, KeyError};
use crate::types::TelemetrySample;
use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Tamanho do bloco AES.
pub const BLOCK_SIZE: usize = 16;

/// Tamanho do IV (igual ao bloco).
pub const IV_LEN: usize = BLOCK_SIZE;

/// Erros do codec. Todos são por mensagem: o frame é descartado e o loop segue.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Envelope malformado: {0}")]
    MalformedEnvelope(String),

    #[error("Padding inconsistente (chave errada ou ciphertext corrompido)")]
    Padding,

    #[error("Plaintext fora da grammar: {0}")]
    FieldParse(String),

    #[error("Erro de serialização: {0}")]
    Serialize(String),
}

// ──────────────────────────────────────────────
// Grammars do plaintext
// ──────────────────────────────────────────────

/// Grammar do plaintext. Sender e receiver precisam usar a mesma.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaintextFormat {
    /// `id:node_ABC123,temp:25.5,hum:60.0,ph:7.0,count:0`
    #[default]
    Kv,
    /// Objeto JSON com `device_id`, `timestamp`, `temperature`…
    Json,
}

impl PlaintextFormat {
    pub fn serialize(&self, sample: &TelemetrySample) -> Result<String, CodecError> {
        match self {
            PlaintextFormat::Kv => Ok(to_kv(sample)),
            PlaintextFormat::Json => {
                serde_json::to_string(sample).map_err(|e| CodecError::Serialize(e.to_string()))
            }
        }
    }

    pub fn parse(&self, text: &str) -> Result<TelemetrySample, CodecError> {
        match self {
            PlaintextFormat::Kv => from_kv(text),
            PlaintextFormat::Json => {
                serde_json::from_str(text).map_err(|e| CodecError::FieldParse(e.to_string()))
            }
        }
    }
}

fn to_kv(sample: &TelemetrySample) -> String {
    let mut fields = vec![format!("id:{}", sample.device_id)];
    push_float(&mut fields, "temp", sample.temperature);
    push_float(&mut fields, "hum", sample.humidity);
    push_float(&mut fields, "ph", sample.ph);
    push_float(&mut fields, "pres", sample.pressure);
    push_float(&mut fields, "bat", sample.battery);
    if let Some(rssi) = sample.rssi {
        fields.push(format!("rssi:{rssi}"));
    }
    fields.push(format!("count:{}", sample.count));
    if let Some(ts) = sample.timestamp {
        fields.push(format!(
            "timestamp:{}",
            ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ));
    }
    fields.join(",")
}

// `{:?}` mantém o ".0" e é a menor representação que volta ao mesmo f64
fn push_float(fields: &mut Vec<String>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        fields.push(format!("{key}:{v:?}"));
    }
}

fn from_kv(text: &str) -> Result<TelemetrySample, CodecError> {
    let mut sample = TelemetrySample::default();
    let mut has_id = false;
    let mut has_count = false;

    for field in text.trim().split(',') {
        // Só o primeiro ':' separa: o timestamp ISO tem outros
        let (key, value) = field
            .split_once(':')
            .ok_or_else(|| CodecError::FieldParse(format!("campo sem ':' → {field:?}")))?;

        match key.trim() {
            "id" => {
                sample.device_id = value.trim().to_string();
                has_id = true;
            }
            "temp" => sample.temperature = Some(parse_field(key, value)?),
            "hum" => sample.humidity = Some(parse_field(key, value)?),
            "ph" => sample.ph = Some(parse_field(key, value)?),
            "pres" => sample.pressure = Some(parse_field(key, value)?),
            "bat" => sample.battery = Some(parse_field(key, value)?),
            "rssi" => sample.rssi = Some(parse_field(key, value)?),
            "count" => {
                sample.count = parse_field(key, value)?;
                has_count = true;
            }
            "timestamp" => {
                let ts = DateTime::parse_from_rfc3339(value.trim())
                    .map_err(|e| CodecError::FieldParse(format!("timestamp {value:?}: {e}")))?;
                sample.timestamp = Some(ts.with_timezone(&Utc));
            }
            // Campos desconhecidos são ignorados (compatibilidade com nós mais novos)
            _ => {}
        }
    }

    if !has_id {
        return Err(CodecError::FieldParse("campo 'id' ausente".into()));
    }
    if !has_count {
        return Err(CodecError::FieldParse("campo 'count' ausente".into()));
    }
    Ok(sample)
}

fn parse_field<T: FromStr>(key: &str, value: &str) -> Result<T, CodecError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CodecError::FieldParse(format!("{key}={value:?}: {e}")))
}

// ──────────────────────────────────────────────
// Codec
// ──────────────────────────────────────────────

/// Converte amostras em envelopes base64 e vice-versa.
#[derive(Debug, Clone)]
pub struct TelemetryCodec {
    key: EnvelopeKey,
    format: PlaintextFormat,
}

impl TelemetryCodec {
    /// Falha imediatamente se a chave não tiver 32 bytes.
    pub fn new(key: &[u8], format: PlaintextFormat) -> Result<Self, KeyError> {
        Ok(Self::with_key(EnvelopeKey::from_bytes(key)?, format))
    }

    pub fn with_key(key: EnvelopeKey, format: PlaintextFormat) -> Self {
        Self { key, format }
    }

    pub fn format(&self) -> PlaintextFormat {
        self.format
    }

    /// Serializa, cifra e codifica uma amostra.
    pub fn encode(&self, sample: &TelemetrySample) -> Result<String, CodecError> {
        let plain = self.format.serialize(sample)?;
        Ok(self.seal(plain.as_bytes()))
    }

    /// Decodifica um envelope recebido.
    pub fn decode(&self, envelope: &str) -> Result<TelemetrySample, CodecError> {
        let plain = self.open(envelope)?;
        let text = String::from_utf8(plain)
            .map_err(|e| CodecError::FieldParse(format!("plaintext não é UTF-8: {e}")))?;
        self.format.parse(&text)
    }

    /// Cifra bytes arbitrários: `base64(IV || AES-CBC(PKCS#7(plain)))`.
    pub fn seal(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let key = GenericArray::from_slice(self.key.as_bytes());
        let ciphertext = Aes256CbcEnc::new(key, GenericArray::from_slice(&iv))
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut frame = Vec::with_capacity(IV_LEN + ciphertext.len());
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&ciphertext);
        STANDARD.encode(frame)
    }

    /// Inverso de [`seal`](Self::seal).
    pub fn open(&self, envelope: &str) -> Result<Vec<u8>, CodecError> {
        let raw = STANDARD
            .decode(envelope.trim())
            .map_err(|e| CodecError::MalformedEnvelope(format!("base64 inválido: {e}")))?;

        if raw.len() < IV_LEN + BLOCK_SIZE || raw.len() % BLOCK_SIZE != 0 {
            return Err(CodecError::MalformedEnvelope(format!(
                "{} bytes não formam IV + blocos de {BLOCK_SIZE}",
                raw.len()
            )));
        }

        let (iv, ciphertext) = raw.split_at(IV_LEN);
        let key = GenericArray::from_slice(self.key.as_bytes());
        Aes256CbcDec::new(key, GenericArray::from_slice(iv))
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CodecError::Padding)
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
