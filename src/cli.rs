//! Interface de linha de comando do procpilot baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (consultas simples,
//! espera pelo serviço e os fluxos orquestrados) e flags globais que
//! sobrescrevem `procpilot.toml`.

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use procpilot::catalog::ListFilter;
use procpilot::config::Settings;

/// procpilot: orquestrador de processos assíncronos do backend.
#[derive(Debug, Parser)]
#[command(name = "procpilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL base do backend.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Credencial (JWT) enviada como bearer token.
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Intervalo entre consultas de status, em milissegundos.
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// Número máximo de retentativas em caso de falha transitória.
    #[arg(long, global = true)]
    pub retry_limit: Option<u32>,

    /// Timeout de cada chamada de rede, em milissegundos.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,
}

impl Cli {
    /// Aplica as flags globais sobre a configuração carregada.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.base_url {
            settings.base_url = url.clone();
        }
        if let Some(token) = &self.token {
            settings.credential = token.clone();
        }
        if let Some(interval) = self.poll_interval_ms {
            settings.poll_interval_ms = interval;
        }
        if let Some(limit) = self.retry_limit {
            settings.retry_limit = limit;
            settings.unbounded_retries = false;
        }
        if let Some(timeout) = self.timeout_ms {
            settings.timeout_ms = timeout;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mostra os detalhes do serviço.
    Details,

    /// Abre o navegador público do backend.
    Browser,

    /// Lista instituições, ou uma instituição específica.
    Institutions {
        /// Código da instituição.
        code: Option<String>,
    },

    /// Lista perfis, ou um perfil específico.
    Profiles {
        #[arg(long)]
        id: Option<String>,

        /// Busca a credencial do perfil (exige --id).
        #[arg(long, requires = "id")]
        credential: bool,
    },

    /// Lista contas.
    Accounts(FilterArgs),

    /// Lista transações.
    Transactions(FilterArgs),

    /// Espera o serviço ficar disponível (ou indisponível, com --down).
    Wait {
        #[arg(long, default_value_t = false)]
        down: bool,
    },

    /// Inicia o onboarding (OTA) de uma instituição.
    Onboard {
        /// Código da instituição.
        code: String,

        #[command(flatten)]
        input: FlowInput,
    },

    /// Adiciona um perfil para uma instituição.
    AddProfile {
        /// Código da instituição.
        code: String,

        #[command(flatten)]
        input: FlowInput,
    },

    /// Executa o login de um perfil existente.
    Login {
        /// Identificador do perfil.
        id: String,

        /// Campo usado para enviar códigos de uso único.
        #[arg(long, default_value = "otp")]
        resume_field: String,
    },

    /// Atualiza as credenciais de um perfil.
    UpdateProfile {
        /// Identificador do perfil.
        id: String,

        #[command(flatten)]
        input: FlowInput,
    },
}

/// Filtros opcionais das listagens.
#[derive(Debug, Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub profile_id: Option<String>,

    #[arg(long)]
    pub account_id: Option<String>,

    #[arg(long)]
    pub transaction_id: Option<String>,

    /// Data inicial (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<String>,

    /// Data final (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<String>,
}

impl From<FilterArgs> for ListFilter {
    fn from(args: FilterArgs) -> Self {
        ListFilter {
            profile_id: args.profile_id,
            account_id: args.account_id,
            transaction_id: args.transaction_id,
            from: args.from,
            to: args.to,
        }
    }
}

/// Entradas dos fluxos que aceitam prompts.
#[derive(Debug, Args)]
pub struct FlowInput {
    /// Resposta a um prompt, no formato chave=valor. Pode ser repetido.
    #[arg(long = "prompt", value_name = "KEY=VALUE")]
    pub prompts: Vec<String>,

    /// Campo usado para enviar códigos de uso único.
    #[arg(long, default_value = "otp")]
    pub resume_field: String,
}

impl FlowInput {
    /// Converte os prompts em um objeto JSON.
    pub fn prompts(&self) -> Result<Value> {
        parse_prompts(&self.prompts)
    }
}

/// Converte pares `chave=valor` em um objeto JSON de strings.
pub fn parse_prompts(pairs: &[String]) -> Result<Value> {
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid prompt '{pair}', expected KEY=VALUE");
        };
        if key.trim().is_empty() {
            bail!("invalid prompt '{pair}', key is empty");
        }
        map.insert(key.trim().to_string(), Value::String(value.to_string()));
    }
    Ok(Value::Object(map))
}
