//! Carregamento de perfis YAML: a descrição declarativa de um lote de tarefas

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::registry::{default_algorithm, family_for_algorithm};
use crate::types::{AlgoParams, AlgorithmFamily, AlgorithmName, ProfilerError, ProfilerResult};

const DEFAULT_PROFILE_NAME: &str = "UnnamedProfile";

/// Limites globais opcionais do perfil
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalSettings {
    /// Teto global de linhas do dataset
    pub rows: Option<usize>,
    /// Teto global de colunas do dataset
    pub columns: Option<usize>,
    /// Deadline global do lote em segundos
    pub global_timeout: Option<u64>,
}

/// Modelo de uma tarefa do perfil, com família e algoritmo já resolvidos
#[derive(Debug, Clone)]
pub struct TaskProfile {
    pub family: AlgorithmFamily,
    pub algorithm: AlgorithmName,
    pub parameters: AlgoParams,
    pub timeout: Option<u64>,
}

/// Perfil carregado
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub global_settings: GlobalSettings,
    pub tasks: Vec<TaskProfile>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    name: Option<String>,
    global_settings: Option<GlobalSettings>,
    tasks: Option<Vec<RawTask>>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    family: Option<AlgorithmFamily>,
    algorithm: Option<AlgorithmName>,
    parameters: Option<AlgoParams>,
    timeout: Option<u64>,
}

/// Carrega e resolve um perfil YAML
///
/// Cada tarefa precisa de pelo menos um entre `family` e `algorithm`; o
/// outro é inferido pelas tabelas do registro. Tarefas sem nenhum dos dois
/// são descartadas com aviso.
pub fn load_profile(path: &Path) -> ProfilerResult<Profile> {
    info!("Carregando perfil de {}", path.display());

    let content = fs::read_to_string(path)
        .map_err(|e| ProfilerError::Profile(format!("{}: {}", path.display(), e)))?;
    let raw: RawProfile = serde_yaml::from_str(&content)
        .map_err(|e| ProfilerError::Profile(format!("{}: {}", path.display(), e)))?;

    let name = raw.name.unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string());
    let global_settings = raw.global_settings.unwrap_or_default();

    let mut tasks = Vec::new();
    for (idx, task) in raw.tasks.unwrap_or_default().into_iter().enumerate() {
        let parameters = task.parameters.unwrap_or_default();
        let (family, algorithm) = match (task.family, task.algorithm) {
            (Some(family), Some(algorithm)) => (family, algorithm),
            (Some(family), None) => (family, default_algorithm(family)),
            (None, Some(algorithm)) => match family_for_algorithm(algorithm, &parameters) {
                Some(family) => (family, algorithm),
                None => {
                    warn!("Tarefa {} do perfil tem algoritmo sem família inferível. Pulando.", idx);
                    continue;
                }
            },
            (None, None) => {
                warn!(
                    "Tarefa {} do perfil não tem 'family' nem 'algorithm' especificados. Pulando.",
                    idx
                );
                continue;
            }
        };
        tasks.push(TaskProfile { family, algorithm, parameters, timeout: task.timeout });
    }

    info!("Perfil carregado: {}", name);
    Ok(Profile { name, global_settings, tasks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_profile(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_full_profile() {
        let file = write_profile(
            r#"
name: nightly
global_settings:
  rows: 1000
  global_timeout: 600
tasks:
  - family: fd
    algorithm: hyfd
    parameters:
      max_lhs: 3
    timeout: 120
  - family: ucc
"#,
        );
        let profile = load_profile(file.path()).unwrap();

        assert_eq!(profile.name, "nightly");
        assert_eq!(profile.global_settings.rows, Some(1000));
        assert_eq!(profile.global_settings.global_timeout, Some(600));
        assert_eq!(profile.tasks.len(), 2);

        assert_eq!(profile.tasks[0].algorithm, AlgorithmName::Hyfd);
        assert_eq!(profile.tasks[0].timeout, Some(120));
        assert_eq!(
            profile.tasks[0].parameters.get("max_lhs").and_then(|v| v.as_u64()),
            Some(3)
        );

        // família sozinha recebe o algoritmo padrão
        assert_eq!(profile.tasks[1].algorithm, AlgorithmName::Hpivalid);
    }

    #[test]
    fn test_algorithm_only_infers_family() {
        let file = write_profile(
            r#"
tasks:
  - algorithm: pyro
  - algorithm: pyro
    parameters:
      error: 0.05
"#,
        );
        let profile = load_profile(file.path()).unwrap();

        assert_eq!(profile.name, "UnnamedProfile");
        assert_eq!(profile.tasks[0].family, AlgorithmFamily::Fd);
        // error > 0 seleciona a variante aproximada
        assert_eq!(profile.tasks[1].family, AlgorithmFamily::Afd);
    }

    #[test]
    fn test_task_without_family_and_algorithm_is_dropped() {
        let file = write_profile(
            r#"
tasks:
  - parameters:
      error: 0.1
  - family: ind
"#,
        );
        let profile = load_profile(file.path()).unwrap();
        assert_eq!(profile.tasks.len(), 1);
        assert_eq!(profile.tasks[0].family, AlgorithmFamily::Ind);
    }

    #[test]
    fn test_invalid_yaml_is_setup_error() {
        let file = write_profile("tasks: [unclosed");
        assert!(matches!(load_profile(file.path()), Err(ProfilerError::Profile(_))));
    }
}
