//! Interface de terminal do ngpipe: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`StageProgress`] acompanha visualmente
//! a execução de uma fase no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::{PostprocessReport, PreprocessReport};

/// Indicador visual de progresso para uma fase do pipeline.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e avisos (amarelo).
/// O indicatif oculta o spinner quando stderr não é um terminal.
pub struct StageProgress {
    pb: ProgressBar,
    green: Style,
    yellow: Style,
}

impl StageProgress {
    /// Inicia o spinner com o nome da fase.
    pub fn start(stage: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(stage.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e resume a fase de pré-processamento.
    pub fn preprocessed(&self, report: &PreprocessReport) {
        self.pb.finish_and_clear();
        println!(
            "  {} {} work units, {} parameter files in the active batch, {} prediction jobs written to {}",
            self.green.apply_to("✓"),
            report.units_written,
            report.param_files.len(),
            report.graph.prediction_jobs().count(),
            report.job_descriptions.display()
        );
        if report.stale > 0 {
            println!(
                "  {} ignored {} parameter files from earlier runs",
                self.yellow.apply_to("!"),
                report.stale
            );
        }
    }

    /// Finaliza o spinner e resume a agregação.
    pub fn postprocessed(&self, report: &PostprocessReport) {
        self.pb.finish_and_clear();
        println!(
            "  {} merged {} rows from {} fragments into {}",
            self.green.apply_to("✓"),
            report.rows,
            report.fragments,
            report.output.display()
        );
    }

    /// Encerra o spinner sem mensagem, antes de reportar um erro.
    pub fn abandon(&self) {
        self.pb.finish_and_clear();
    }
}

/// Imprime um erro e sua cadeia de causas em vermelho.
pub fn print_error(err: &anyhow::Error) {
    let red = Style::new().red().bold();
    eprintln!("  {} {err:#}", red.apply_to("✗"));
}
