//! Carregamento de datasets CSV e impressão digital do arquivo de origem

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::types::{ProfilerError, ProfilerResult};

const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Tabela em memória: matriz de células em texto
///
/// A representação é deliberadamente simples; os kernels de mineração fazem
/// suas próprias projeções e conversões numéricas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Nome lógico (stem do arquivo de origem)
    pub name: String,
    /// Nomes das colunas
    pub columns: Vec<String>,
    /// Linhas, todas com `columns.len()` células
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: String, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { name, columns, rows }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Fatia de prefixo com as primeiras `n` linhas; a forma das colunas
    /// nunca muda
    pub fn head(&self, n: usize) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Valores de uma coluna, na ordem das linhas
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().map(move |row| row[idx].as_str())
    }

    /// Coluna interpretada como numérica; `None` se alguma célula não-vazia
    /// não parseia
    pub fn numeric_column(&self, idx: usize) -> Option<Vec<f64>> {
        let mut values = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let cell = row[idx].trim();
            if cell.is_empty() {
                return None;
            }
            values.push(cell.parse::<f64>().ok()?);
        }
        Some(values)
    }
}

/// Carrega um CSV aplicando os limites globais de linhas/colunas do perfil
/// e calcula a impressão digital do arquivo
pub fn load_table(
    path: &Path,
    delimiter: u8,
    has_header: bool,
    row_cap: Option<usize>,
    col_cap: Option<usize>,
) -> ProfilerResult<(Table, Option<String>)> {
    info!("Carregando CSV de {}", path.display());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_header)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ProfilerError::Dataset(format!("{}: {}", path.display(), e)))?;

    let mut columns: Vec<String> = if has_header {
        reader
            .headers()
            .map_err(|e| ProfilerError::Dataset(format!("{}: {}", path.display(), e)))?
            .iter()
            .map(|h| h.to_string())
            .collect()
    } else {
        Vec::new()
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut ragged = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| ProfilerError::Dataset(format!("{}: {}", path.display(), e)))?;
        let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
        if columns.is_empty() {
            columns = (0..row.len()).map(|i| format!("col_{}", i)).collect();
        }
        if row.len() != columns.len() {
            ragged += 1;
            row.resize(columns.len(), String::new());
        }
        rows.push(row);
    }
    if ragged > 0 {
        warn!("{} linhas com número de células divergente foram normalizadas", ragged);
    }

    let fingerprint = file_fingerprint(path);

    let n_rows = row_cap.map_or(rows.len(), |cap| cap.min(rows.len()));
    let n_cols = col_cap.map_or(columns.len(), |cap| cap.min(columns.len()));
    rows.truncate(n_rows);
    if n_cols < columns.len() {
        columns.truncate(n_cols);
        for row in &mut rows {
            row.truncate(n_cols);
        }
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());

    info!("CSV carregado com {} linhas e {} colunas", rows.len(), columns.len());
    Ok((Table::new(name, columns, rows), fingerprint))
}

/// SHA-256 do arquivo em blocos de 64 KiB; erros degradam para `None`
pub fn file_fingerprint(path: &Path) -> Option<String> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Erro ao calcular impressão digital de {}: {}", path.display(), e);
            return None;
        }
    };

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) => {
                warn!("Erro ao calcular impressão digital de {}: {}", path.display(), e);
                return None;
            }
        }
    }
    Some(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_with_header() {
        let file = write_csv("a,b,c\n1,2,3\n4,5,6\n");
        let (table, hash) = load_table(file.path(), b',', true, None, None).unwrap();

        assert_eq!(table.columns, vec!["a", "b", "c"]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.rows[1], vec!["4", "5", "6"]);
        assert!(hash.is_some());
    }

    #[test]
    fn test_load_without_header_names_columns() {
        let file = write_csv("1;2\n3;4\n");
        let (table, _) = load_table(file.path(), b';', false, None, None).unwrap();

        assert_eq!(table.columns, vec!["col_0", "col_1"]);
        assert_eq!(table.n_rows(), 2);
    }

    #[test]
    fn test_row_and_column_caps() {
        let file = write_csv("a,b,c\n1,2,3\n4,5,6\n7,8,9\n");
        let (table, _) = load_table(file.path(), b',', true, Some(2), Some(2)).unwrap();

        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.n_cols(), 2);
        assert_eq!(table.rows[0], vec!["1", "2"]);
    }

    #[test]
    fn test_head_keeps_column_shape() {
        let file = write_csv("a,b\n1,2\n3,4\n5,6\n");
        let (table, _) = load_table(file.path(), b',', true, None, None).unwrap();
        let sliced = table.head(2);

        assert_eq!(sliced.n_rows(), 2);
        assert_eq!(sliced.n_cols(), table.n_cols());
        assert_eq!(sliced.columns, table.columns);
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let file_a = write_csv("a,b\n1,2\n");
        let file_b = write_csv("a,b\n1,2\n");
        let file_c = write_csv("a,b\n9,9\n");

        let hash_a = file_fingerprint(file_a.path()).unwrap();
        assert_eq!(hash_a, file_fingerprint(file_a.path()).unwrap());
        assert_eq!(hash_a, file_fingerprint(file_b.path()).unwrap());
        assert_ne!(hash_a, file_fingerprint(file_c.path()).unwrap());
    }

    #[test]
    fn test_fingerprint_missing_file_is_none() {
        assert!(file_fingerprint(Path::new("/nonexistent/data.csv")).is_none());
    }

    #[test]
    fn test_numeric_column() {
        let table = Table::new(
            "t".to_string(),
            vec!["n".to_string(), "s".to_string()],
            vec![
                vec!["1.5".to_string(), "x".to_string()],
                vec!["2".to_string(), "y".to_string()],
            ],
        );
        assert_eq!(table.numeric_column(0), Some(vec![1.5, 2.0]));
        assert!(table.numeric_column(1).is_none());
    }
}
