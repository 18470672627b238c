//! Configuração de logging: camada de console com nível da CLI e camada de
//! arquivo por run anexada depois que o diretório do run existe

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::types::{ProfilerError, ProfilerResult};

/// Escritor compartilhado do log de run; começa inerte e passa a escrever
/// quando um arquivo é anexado
#[derive(Clone, Default)]
pub struct RunLogWriter {
    inner: Arc<Mutex<Option<File>>>,
}

impl RunLogWriter {
    /// Anexa o `profiling.log` do run corrente
    pub fn attach_file(&self, path: &Path) -> ProfilerResult<()> {
        let file = File::create(path)?;
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ProfilerError::Internal("lock do log envenenado".to_string()))?;
        *guard = Some(file);
        Ok(())
    }
}

/// Alça de escrita devolvida por camada de log
pub struct RunLogHandle(Arc<Mutex<Option<File>>>);

impl io::Write for RunLogHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(mut guard) = self.0.lock() {
            if let Some(file) = guard.as_mut() {
                return file.write(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Ok(mut guard) = self.0.lock() {
            if let Some(file) = guard.as_mut() {
                return file.flush();
            }
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RunLogWriter {
    type Writer = RunLogHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogHandle(Arc::clone(&self.inner))
    }
}

/// Inicializa o logging do processo de controle
///
/// O console respeita `RUST_LOG` quando presente e o nível da CLI caso
/// contrário; o arquivo de run grava tudo a partir de DEBUG.
pub fn init_logging(console_level: &str) -> RunLogWriter {
    let writer = RunLogWriter::default();

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_lowercase()));
    let console_layer = fmt::layer().with_target(false).with_filter(console_filter);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer.clone())
        .with_filter(LevelFilter::DEBUG);

    // try_init: um segundo init (testes, chamadas repetidas) é inofensivo
    let _ = tracing_subscriber::registry().with(console_layer).with(file_layer).try_init();
    writer
}

/// Logging mínimo do processo worker: stderr, para não poluir o protocolo
/// binário do stdout
pub fn init_worker_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_writer_is_inert_without_file() {
        let writer = RunLogWriter::default();
        let mut handle = writer.make_writer();
        assert_eq!(handle.write(b"descartado").unwrap(), 10);
    }

    #[test]
    fn test_writer_appends_after_attach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiling.log");

        let writer = RunLogWriter::default();
        writer.attach_file(&path).unwrap();
        let mut handle = writer.make_writer();
        handle.write_all(b"linha de log\n").unwrap();
        handle.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "linha de log\n");
    }
}
