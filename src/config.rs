//! Configuração do ngpipe carregada a partir de `ngpipe.toml`.
//!
//! A struct [`PipelineConfig`] contém todos os caminhos e parâmetros de cada fase.
//! Valores não presentes no arquivo usam defaults derivados de `root`.
//! A variável de ambiente `NGPIPE_ROOT` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "ngpipe.toml";

/// Configuração de nível superior carregada de `ngpipe.toml`.
///
/// Os diretórios opcionais são resolvidos sob demanda pelos métodos de acesso,
/// sempre relativos a `root` quando forem caminhos relativos.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Raiz do projeto.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Diretório de saída (padrão: `<root>/output-directory`).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Diretório dos documentos de parâmetros de cada unidade.
    #[serde(default)]
    pub params_dir: Option<PathBuf>,

    /// Diretório dos payloads brutos de cada unidade.
    #[serde(default)]
    pub inputs_dir: Option<PathBuf>,

    /// Diretório onde cada job de predição grava seu resultado.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Caminho do documento de descrição de jobs.
    #[serde(default)]
    pub job_descriptions: Option<PathBuf>,

    /// Intervalo máximo, em milissegundos, entre arquivos do mesmo lote.
    #[serde(default = "default_batch_gap_ms")]
    pub batch_gap_ms: u64,

    /// Executável referenciado nos comandos gerados.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Tag `type` gravada no artefato agregado.
    #[serde(default = "default_result_type")]
    pub result_type: String,

    /// Falha quando os cabeçalhos dos fragmentos divergem.
    #[serde(default)]
    pub strict_headers: bool,

    /// Metadados que a entrada precisa trazer para que os jobs de predição rodem.
    #[serde(default = "default_required_metadata")]
    pub required_metadata: Vec<String>,
}

// Valor padrão para a raiz: diretório atual.
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

// Valor padrão para o intervalo entre lotes: 100ms.
fn default_batch_gap_ms() -> u64 {
    100
}

// Valor padrão para o tipo de resultado: "peptide_table".
fn default_result_type() -> String {
    "peptide_table".to_string()
}

// O preditor embutido precisa do aminoácido a contar.
fn default_required_metadata() -> Vec<String> {
    vec!["amino_acid".to_string()]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            output_dir: None,
            params_dir: None,
            inputs_dir: None,
            results_dir: None,
            job_descriptions: None,
            batch_gap_ms: default_batch_gap_ms(),
            executable: None,
            result_type: default_result_type(),
            strict_headers: false,
            required_metadata: default_required_metadata(),
        }
    }
}

impl PipelineConfig {
    /// Carrega a configuração do arquivo indicado.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PipelineConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a raiz.
        Ok(config.with_root_override(std::env::var("NGPIPE_ROOT").ok()))
    }

    /// Aplica uma raiz alternativa, ignorando valores vazios.
    pub fn with_root_override(mut self, root: Option<String>) -> Self {
        if let Some(root) = root.filter(|r| !r.is_empty()) {
            self.root = PathBuf::from(root);
        }
        self
    }

    /// Raiz resolvida contra o diretório atual, para que os caminhos gravados
    /// no documento de jobs não dependam de onde o executor é iniciado.
    pub fn root(&self) -> PathBuf {
        std::path::absolute(&self.root).unwrap_or_else(|_| self.root.clone())
    }

    fn under_root(&self, path: &Path) -> PathBuf {
        self.root().join(path)
    }

    pub fn output_dir(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => self.under_root(dir),
            None => self.root().join("output-directory"),
        }
    }

    pub fn params_dir(&self) -> PathBuf {
        match &self.params_dir {
            Some(dir) => self.under_root(dir),
            None => self.output_dir().join("predict-inputs").join("params"),
        }
    }

    pub fn inputs_dir(&self) -> PathBuf {
        match &self.inputs_dir {
            Some(dir) => self.under_root(dir),
            None => self.output_dir().join("predict-inputs").join("data"),
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        match &self.results_dir {
            Some(dir) => self.under_root(dir),
            None => self.output_dir().join("predict-outputs"),
        }
    }

    pub fn job_descriptions(&self) -> PathBuf {
        match &self.job_descriptions {
            Some(path) => self.under_root(path),
            None => self.root().join("job_descriptions.json"),
        }
    }

    /// Intervalo de agrupamento usado pelo seletor de lotes.
    pub fn batch_gap(&self) -> Duration {
        Duration::from_millis(self.batch_gap_ms)
    }

    /// Executável usado nos comandos; na ausência de configuração, o binário atual.
    pub fn executable(&self) -> PathBuf {
        self.executable
            .clone()
            .or_else(|| std::env::current_exe().ok())
            .unwrap_or_else(|| PathBuf::from("ngpipe"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_gap_ms, 100);
        assert_eq!(config.batch_gap(), Duration::from_millis(100));
        assert_eq!(config.result_type, "peptide_table");
        assert!(!config.strict_headers);
        assert_eq!(config.required_metadata, vec!["amino_acid"]);
        assert!(config.params_dir().ends_with("output-directory/predict-inputs/params"));
        assert!(config.results_dir().ends_with("output-directory/predict-outputs"));
        assert!(config.job_descriptions().ends_with("job_descriptions.json"));
    }

    #[test]
    fn default_root_resolves_to_absolute_paths() {
        let config = PipelineConfig::default();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.root(), cwd);
        for path in [
            config.output_dir(),
            config.params_dir(),
            config.inputs_dir(),
            config.results_dir(),
            config.job_descriptions(),
        ] {
            assert!(path.is_absolute(), "{} is relative", path.display());
            assert!(path.starts_with(&cwd));
        }
    }

    #[test]
    fn relative_root_is_anchored_at_working_directory() {
        let config = PipelineConfig::default().with_root_override(Some("proj".into()));
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.results_dir(), cwd.join("proj/output-directory/predict-outputs"));
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            root = "/srv/counter"
            results_dir = "results"
            batch_gap_ms = 250
            required_metadata = []
        "#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batch_gap_ms, 250);
        assert_eq!(config.results_dir(), PathBuf::from("/srv/counter/results"));
        assert_eq!(
            config.inputs_dir(),
            PathBuf::from("/srv/counter/output-directory/predict-inputs/data")
        );
        assert_eq!(config.result_type, "peptide_table");
        assert!(config.required_metadata.is_empty());
    }

    #[test]
    fn absolute_paths_are_kept() {
        let config = PipelineConfig {
            params_dir: Some(PathBuf::from("/tmp/params")),
            ..Default::default()
        };
        assert_eq!(config.params_dir(), PathBuf::from("/tmp/params"));
    }

    #[test]
    fn root_override_ignores_empty_value() {
        let config = PipelineConfig::default().with_root_override(Some(String::new()));
        assert_eq!(config.root, PathBuf::from("."));

        let config = PipelineConfig::default().with_root_override(Some("/data".into()));
        assert_eq!(config.output_dir(), PathBuf::from("/data/output-directory"));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.batch_gap_ms, 100);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ngpipe.toml");
        std::fs::write(&path, "batch_gap_ms = \"soon\"").unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }
}
