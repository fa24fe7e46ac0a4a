//! Chave simétrica do envelope (AES-256).
//!
//! A chave vem de um keyfile externo com exatamente 32 bytes crus.
//! Qualquer outro tamanho é erro fatal de configuração.

use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

/// Tamanho exigido da chave (256 bits).
pub const KEY_LEN: usize = 32;

/// Erros ao carregar ou validar a chave.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Chave com tamanho inválido: {0} bytes (exigido {KEY_LEN})")]
    InvalidLength(usize),

    #[error("Falha ao ler keyfile {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Chave de 32 bytes. Zerada ao sair de escopo e nunca impressa.
#[derive(Clone)]
pub struct EnvelopeKey([u8; KEY_LEN]);

impl EnvelopeKey {
    /// Valida o tamanho e copia os bytes da chave.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Lê a chave de um keyfile binário.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let mut bytes = std::fs::read(path).map_err(|source| KeyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for EnvelopeKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvelopeKey(<redacted>)")
    }
}
