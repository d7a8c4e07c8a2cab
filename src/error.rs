//! # Errores del Servidor
//! src/error.rs
//!
//! Errores que salen de la API pública del servidor. Los errores de una
//! conexión individual nunca llegan aquí: se registran y se descartan
//! dentro del worker que la atiende.

use crate::server::ServerState;
use std::io;

/// Errores del ciclo de vida del servidor
#[derive(Debug)]
pub enum ServerError {
    /// No se pudo hacer bind (puerto ocupado, permisos, dirección inválida)
    Bind {
        addr: String,
        source: io::Error,
    },

    /// La configuración no pasó `Config::validate`
    InvalidConfig(String),

    /// `start()` llamado cuando el servidor no estaba en `Stopped`
    InvalidState(ServerState),

    /// Error de I/O durante el arranque (ej: no se pudo crear un thread)
    Io(io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        ServerError::Bind {
            addr: addr.into(),
            source,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind { addr, source } => {
                write!(f, "Failed to bind {}: {}", addr, source)
            }
            ServerError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            ServerError::InvalidState(state) => {
                write!(f, "Cannot start server in state {}", state)
            }
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}
