//! Interface de terminal do procpilot: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! um job no terminal, do start até o estado terminal.

use std::io;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use procpilot::state_machine::{JobOutcome, JobPhase, JobReport, JobState};

/// Indicador visual de progresso para um job no terminal.
///
/// Exibe um spinner animado enquanto o job consulta o backend e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para retentativas e pedidos de entrada.
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com a descrição do job.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("STARTING: {description}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o estado atual.
    pub fn update_state(&self, state: &JobState) {
        let message = match state {
            JobState::Polling {
                process_id,
                status,
                retries: 0,
            } => format!("{state}: process {process_id} is {status}"),
            JobState::Polling {
                process_id,
                retries,
                ..
            } => {
                self.retry(*retries, process_id);
                format!("{state}: process {process_id}")
            }
            JobState::AwaitingResume { process_id, .. } => {
                format!("{state}: process {process_id} needs input")
            }
            other => other.to_string(),
        };
        self.pb.set_message(message);
    }

    /// Exibe uma mensagem de retentativa com o número da tentativa.
    pub fn retry(&self, attempt: u32, process_id: &str) {
        self.pb.println(format!(
            "  {} Retry {attempt}: status check for {process_id} failed",
            self.yellow.apply_to("↻")
        ));
    }

    /// Pausa o spinner e pede ao usuário o valor de `field`.
    pub fn prompt(&self, field: &str, snapshot: &Value) -> io::Result<String> {
        let term = Term::stderr();
        self.pb.suspend(|| {
            if !snapshot.is_null() {
                let _ = term.write_line(&serde_json::to_string_pretty(snapshot).unwrap_or_default());
            }
            term.write_str(&format!("{} {field}: ", self.yellow.apply_to("?")))?;
            term.read_line()
        })
    }

    /// Finaliza o spinner e exibe o resultado final do job.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X.
    pub fn complete(&self, outcome: &JobOutcome) {
        self.pb.finish_and_clear();
        match outcome {
            JobOutcome::Done(_) => {
                eprintln!("  {} Job completed successfully", self.green.apply_to("✓"));
            }
            JobOutcome::Failed(failure) => {
                eprintln!("  {} Job failed: {failure}", self.red.apply_to("✗"));
            }
            JobOutcome::Stopped => {
                eprintln!("  {} Job stopped", self.yellow.apply_to("■"));
            }
        }
    }

    /// Imprime o relatório final formatado em JSON com estilo colorido.
    pub fn print_report(&self, report: &JobReport) {
        let style = match report.final_phase {
            JobPhase::Done => &self.green,
            JobPhase::Failed => &self.red,
            _ => &self.yellow,
        };
        eprintln!();
        eprintln!("{}", style.apply_to("─── Job Report ───"));
        eprintln!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}
