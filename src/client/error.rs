//! Tipos de erro para chamadas ao backend.
//!
//! Define [`RequestError`] com variantes para timeout, falha de rede, rejeição
//! pelo backend e respostas malformadas. Apenas timeout e falha de rede são
//! transitórios: o poller pode retentá-los, o resto encerra a operação.

use thiserror::Error;

use crate::poller::Transient;

/// Erros que podem ocorrer ao executar uma única chamada ao backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// A chamada excedeu o timeout configurado.
    #[error("request timed out")]
    Timeout,

    /// Falha de rede subjacente (DNS, conexão recusada, conexão resetada).
    #[error("network error: {0}")]
    Network(String),

    /// O backend respondeu com status fora de 2xx.
    #[error("backend rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// O corpo da resposta não pôde ser interpretado.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Transient for RequestError {
    fn is_transient(&self) -> bool {
        matches!(self, RequestError::Timeout | RequestError::Network(_))
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RequestError::Timeout
        } else if err.is_decode() {
            RequestError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            RequestError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RequestError::Network(err.to_string())
        }
    }
}
