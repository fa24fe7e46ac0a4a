//! Persistência opcional do contador de amostras entre reinícios.

use crate::ledger::{parent_dir, sync_parent};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Arquivo texto com o próximo valor do contador.
#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Próximo valor salvo; 0 se o arquivo ainda não existe.
    pub fn load(&self) -> io::Result<u64> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content.trim().parse().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("contador inválido em {}: {e}", self.path.display()),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Grava via arquivo temporário + rename + fsync do diretório.
    pub fn store(&self, next: u64) -> io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(&self.path))?;
        writeln!(tmp, "{next}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        sync_parent(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path().join("counter.txt"));
        assert_eq!(store.load().unwrap(), 0);
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CounterStore::new(dir.path().join("counter.txt"));
        store.store(41).unwrap();
        store.store(42).unwrap();
        assert_eq!(store.load().unwrap(), 42);
    }

    #[test]
    fn garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.txt");
        std::fs::write(&path, "quarenta").unwrap();
        let err = CounterStore::new(path).load().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
