//! Interface de linha de comando do ngpipe baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (preprocess, predict,
//! postprocess) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};

use crate::artifact::OutputFormat;

/// ngpipe: pipelines de divisão, predição e agregação.
#[derive(Debug, Parser)]
#[command(name = "ngpipe", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ngpipe.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Formato de saída aceito pela CLI, mapeado para [`OutputFormat`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Documento JSON com `warnings`, `errors` e `results`.
    Json,
    /// Tabela separada por tabulações.
    Tsv,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Tsv => OutputFormat::Tsv,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Divide a entrada em unidades e gera o documento de descrição de jobs.
    Preprocess {
        /// Arquivo JSON com as sequências e os parâmetros compartilhados.
        #[arg(long = "input-json", short = 'j', value_name = "JSON_FILE")]
        input_json: PathBuf,

        /// Diretório para os documentos de parâmetros de cada unidade.
        #[arg(long)]
        params_dir: Option<PathBuf>,

        /// Diretório para os payloads de cada unidade.
        #[arg(long)]
        inputs_dir: Option<PathBuf>,

        /// Caminho do documento de descrição de jobs a ser gerado.
        #[arg(long = "job-desc-file")]
        job_desc_file: Option<PathBuf>,

        /// Formato do resultado final agregado.
        #[arg(long = "output-format", short = 'f', value_enum, default_value_t = FormatArg::Json)]
        output_format: FormatArg,
    },

    /// Executa o preditor de referência (contagem de aminoácidos).
    #[command(group(
        ArgGroup::new("input")
            .required(true)
            .args(["input_json", "input_tsv"])
    ))]
    Predict {
        /// Documento de entrada bruto ou de parâmetros de uma unidade.
        #[arg(long = "input-json", short = 'j', value_name = "JSON_FILE")]
        input_json: Option<PathBuf>,

        /// Tabela TSV cuja primeira coluna contém os peptídeos.
        #[arg(long = "input-tsv", short = 't', value_name = "TSV_FILE", requires = "amino_acid")]
        input_tsv: Option<PathBuf>,

        /// Aminoácido a contar (apenas com --input-tsv).
        #[arg(long = "amino-acid", short = 'a', requires = "input_tsv")]
        amino_acid: Option<String>,

        /// Prefixo do arquivo de saída; sem ele o resultado vai para stdout.
        #[arg(long = "output-prefix", short = 'o', value_name = "OUTPUT_PREFIX")]
        output_prefix: Option<PathBuf>,

        /// Formato do resultado.
        #[arg(long = "output-format", short = 'f', value_enum, default_value_t = FormatArg::Json)]
        output_format: FormatArg,
    },

    /// Agrega os resultados dos jobs de predição em um único artefato.
    Postprocess {
        /// Documento de descrição de jobs; sem ele, lê o diretório de resultados.
        #[arg(long = "job-desc-file")]
        job_desc_file: Option<PathBuf>,

        /// Diretório com os resultados a agregar.
        #[arg(long = "input-results-dir")]
        input_results_dir: Option<PathBuf>,

        /// Diretório onde o resultado agregado é gravado.
        #[arg(long = "postprocessed-results-dir")]
        postprocessed_results_dir: Option<PathBuf>,

        /// Prefixo do arquivo de saída.
        #[arg(long = "output-prefix", short = 'o', value_name = "OUTPUT_PREFIX")]
        output_prefix: Option<PathBuf>,

        /// Formato do resultado.
        #[arg(long = "output-format", short = 'f', value_enum, default_value_t = FormatArg::Json)]
        output_format: FormatArg,

        /// Falha se os cabeçalhos dos fragmentos divergirem.
        #[arg(long, default_value_t = false)]
        strict_headers: bool,
    },
}
