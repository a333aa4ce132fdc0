//! Configuração do procpilot carregada a partir de `procpilot.toml`.
//!
//! A struct [`Settings`] contém os parâmetros do arquivo; valores ausentes usam
//! defaults sensíveis. As variáveis de ambiente `PROCPILOT_TOKEN` e
//! `PROCPILOT_BASE_URL` têm precedência sobre o arquivo.
//!
//! [`OrchestrationOptions`] é a forma resolvida usada por cada job: é copiada
//! uma única vez no início da orquestração e nunca recalculada por chamada.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::poller::{PollSettings, RetryLimit};

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "procpilot.toml";

/// Configuração de nível superior carregada de `procpilot.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// URL base do backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Credencial (JWT) enviada como bearer token.
    #[serde(default)]
    pub credential: String,

    /// Timeout de cada chamada de rede, em milissegundos.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Máximo de retentativas de falhas transitórias durante o polling.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Ignora `retry_limit` e retenta indefinidamente.
    #[serde(default)]
    pub unbounded_retries: bool,

    /// Atraso entre retentativas, em milissegundos.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Intervalo entre consultas de status, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retentativas da chamada inicial (start). Zero desativa.
    #[serde(default)]
    pub start_retries: u32,
}

// Valor padrão da URL base: backend local.
fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

// Valor padrão do timeout por chamada: 30s.
fn default_timeout_ms() -> u64 {
    30_000
}

// Valor padrão para retentativas máximas: 3.
fn default_retry_limit() -> u32 {
    3
}

// Valor padrão do atraso entre retentativas: 1000ms.
fn default_retry_delay_ms() -> u64 {
    1000
}

// Valor padrão do intervalo de polling: 2000ms.
fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            credential: String::new(),
            timeout_ms: default_timeout_ms(),
            retry_limit: default_retry_limit(),
            unbounded_retries: false,
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            start_retries: 0,
        }
    }
}

impl Settings {
    /// Carrega a configuração de `procpilot.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(Path::new(CONFIG_FILE))?;

        // Variáveis de ambiente têm precedência sobre o arquivo.
        if let Ok(token) = std::env::var("PROCPILOT_TOKEN") {
            if !token.is_empty() {
                settings.credential = token;
            }
        }
        if let Ok(url) = std::env::var("PROCPILOT_BASE_URL") {
            if !url.is_empty() {
                settings.base_url = url;
            }
        }

        Ok(settings)
    }

    /// Carrega a configuração de um caminho explícito, sem consultar o ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str::<Settings>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Opções resolvidas de uma orquestração.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationOptions {
    pub credential: Option<String>,
    /// Timeout de cada chamada individual, distinto do intervalo de polling.
    pub timeout: Duration,
    pub retry_limit: RetryLimit,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    /// Retentativas de falhas transitórias no start; zero por padrão.
    pub start_retries: u32,
}

impl Default for OrchestrationOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for OrchestrationOptions {
    fn from(settings: &Settings) -> Self {
        let credential = Some(settings.credential.clone()).filter(|c| !c.is_empty());
        let retry_limit = if settings.unbounded_retries {
            RetryLimit::Unbounded
        } else {
            RetryLimit::Bounded(settings.retry_limit)
        };
        Self {
            credential,
            timeout: Duration::from_millis(settings.timeout_ms),
            retry_limit,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            start_retries: settings.start_retries,
        }
    }
}

impl OrchestrationOptions {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            retry_limit: self.retry_limit,
            retry_delay: self.retry_delay,
        }
    }
}
