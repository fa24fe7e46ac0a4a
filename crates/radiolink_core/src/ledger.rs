//! Ledger de reenvio: fila FIFO durável dos envelopes que não foram enviados.
//!
//! Formato do arquivo: um envelope por linha.
//!
//! - `append` só acrescenta ao final + fsync, nunca reescreve o que já existe
//! - `remove_oldest` grava as entradas restantes num arquivo temporário no
//!   mesmo diretório e faz `rename` atômico por cima do ledger
//! - Criar, renomear ou apagar o arquivo é seguido de fsync do diretório, para
//!   que uma entrada removida não volte depois de queda de energia
//! - Todas as operações passam pelo mesmo mutex (leitura-modificação-escrita)

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Erros do ledger. Fatais para o sender: sem armazenamento durável não há
/// garantia de entrega.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Erro de I/O no ledger {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Entrada inválida para o ledger (contém quebra de linha)")]
    InvalidEntry,
}

/// Fila FIFO de payloads pendentes.
pub trait RetryLedger {
    /// Acrescenta o payload como entrada mais nova.
    fn append(&self, payload: &str) -> Result<(), LedgerError>;

    /// Entrada mais antiga, sem remover.
    fn peek_oldest(&self) -> Option<String>;

    /// Remove exatamente a entrada mais antiga. No-op com a fila vazia.
    fn remove_oldest(&self) -> Result<(), LedgerError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_entry(payload: &str) -> Result<(), LedgerError> {
    if payload.contains(['\n', '\r']) {
        return Err(LedgerError::InvalidEntry);
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Ledger em arquivo
// ──────────────────────────────────────────────

/// Ledger persistido em arquivo texto, uma entrada por linha.
pub struct FileLedger {
    path: PathBuf,
    entries: Mutex<VecDeque<String>>,
}

impl FileLedger {
    /// Abre (ou cria) o ledger, carregando o backlog existente.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
        }

        let (entries, torn) = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            parse_entries(&content)
        } else {
            (VecDeque::new(), false)
        };

        if torn {
            warn!(
                "Ledger {} tinha uma linha incompleta no final (crash durante append); descartada",
                path.display()
            );
            rewrite(&path, &entries)?;
        }

        if entries.is_empty() {
            debug!("Ledger {} vazio", path.display());
        } else {
            info!(
                "Ledger {} aberto com {} entrada(s) pendente(s)",
                path.display(),
                entries.len()
            );
        }

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RetryLedger for FileLedger {
    fn append(&self, payload: &str) -> Result<(), LedgerError> {
        check_entry(payload)?;
        let mut entries = self.entries.lock();
        let created = !self.path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(format!("{payload}\n").as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| io_err(&self.path, e))?;
        if created {
            sync_parent(&self.path).map_err(|e| io_err(&self.path, e))?;
        }

        entries.push_back(payload.to_string());
        Ok(())
    }

    fn peek_oldest(&self) -> Option<String> {
        self.entries.lock().front().cloned()
    }

    fn remove_oldest(&self) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            return Ok(());
        }

        let remaining: VecDeque<String> = entries.iter().skip(1).cloned().collect();
        rewrite(&self.path, &remaining)?;
        *entries = remaining;
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Separa as entradas; o segundo valor indica uma linha final sem `\n`.
fn parse_entries(content: &str) -> (VecDeque<String>, bool) {
    let mut entries = VecDeque::new();
    let mut torn = false;
    for line in content.split_inclusive('\n') {
        if !line.ends_with('\n') {
            torn = true;
            continue;
        }
        let entry = line.trim();
        if !entry.is_empty() {
            entries.push_back(entry.to_string());
        }
    }
    (entries, torn)
}

fn rewrite(path: &Path, entries: &VecDeque<String>) -> Result<(), LedgerError> {
    if entries.is_empty() {
        return match std::fs::remove_file(path) {
            Ok(()) => sync_parent(path).map_err(|e| io_err(path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(path, e)),
        };
    }

    let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(path)).map_err(|e| io_err(path, e))?;
    for entry in entries {
        writeln!(tmp, "{entry}").map_err(|e| io_err(path, e))?;
    }
    tmp.as_file().sync_all().map_err(|e| io_err(path, e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    sync_parent(path).map_err(|e| io_err(path, e))
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// fsync do diretório que contém `path` (torna rename/unlink duráveis).
#[cfg(unix)]
pub(crate) fn sync_parent(path: &Path) -> std::io::Result<()> {
    std::fs::File::open(parent_dir(path))?.sync_all()
}

/// Sem equivalente portátil fora de Unix.
#[cfg(not(unix))]
pub(crate) fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ──────────────────────────────────────────────
// Ledger em memória
// ──────────────────────────────────────────────

/// Mesma semântica do [`FileLedger`], sem persistência.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<VecDeque<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cópia das entradas, da mais antiga para a mais nova.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl RetryLedger for MemoryLedger {
    fn append(&self, payload: &str) -> Result<(), LedgerError> {
        check_entry(payload)?;
        self.entries.lock().push_back(payload.to_string());
        Ok(())
    }

    fn peek_oldest(&self) -> Option<String> {
        self.entries.lock().front().cloned()
    }

    fn remove_oldest(&self) -> Result<(), LedgerError> {
        self.entries.lock().pop_front();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
