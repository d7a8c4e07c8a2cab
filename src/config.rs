//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración del listener con soporte para argumentos CLI y variables
//! de entorno (no hay archivo de configuración).
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./hello_server --port 8080 \
//!   --workers 10 \
//!   --queue-capacity 64 \
//!   --backpressure reject \
//!   --idle-timeout-ms 30000
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8080 HTTP_HOST=0.0.0.0 WORKERS=16 ./hello_server
//! ```

use crate::http::RequestLimits;
use crate::server::pool::{BackpressurePolicy, PoolConfig};
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// Configuración del servidor HTTP/1.1
#[derive(Debug, Clone, Parser)]
#[command(name = "hello_server")]
#[command(about = "Listener HTTP/1.1 concurrente con pool de workers acotado")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Puerto en el que escucha el servidor (0 = puerto efímero)
    #[arg(short, long, default_value = "8080", env = "HTTP_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    // === Pool ===

    /// Número de workers que atienden conexiones
    #[arg(short, long, default_value = "10", env = "WORKERS")]
    pub workers: usize,

    /// Conexiones aceptadas que pueden esperar un worker libre
    #[arg(long = "queue-capacity", default_value = "64", env = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Qué hacer cuando la cola está llena: bloquear el accept o responder 503
    #[arg(long, value_enum, default_value = "block", env = "BACKPRESSURE")]
    pub backpressure: BackpressurePolicy,

    // === Timeouts ===

    /// Timeout de lectura/escritura por conexión en milisegundos
    #[arg(long = "idle-timeout-ms", default_value = "30000", env = "IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Tiempo total para recibir la cabecera de un request en milisegundos
    #[arg(long = "request-timeout-ms", default_value = "60000", env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Tiempo máximo que `stop()` espera a las conexiones en curso
    #[arg(long = "shutdown-grace-ms", default_value = "5000", env = "SHUTDOWN_GRACE_MS")]
    pub shutdown_grace_ms: u64,

    // === Límites del request ===

    /// Máximo de líneas de header por request
    #[arg(long = "max-headers", default_value = "100", env = "MAX_HEADERS")]
    pub max_headers: usize,

    /// Longitud máxima de la request line y de cada header
    #[arg(long = "max-line-bytes", default_value = "8192", env = "MAX_LINE_BYTES")]
    pub max_line_bytes: usize,

    // === Logging ===

    /// Nivel de log si RUST_LOG no está definido (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use hello_server::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // IPv6 literal
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("Workers must be >= 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be >= 1".to_string());
        }
        if self.idle_timeout_ms == 0 {
            return Err("Idle timeout must be > 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("Request timeout must be > 0".to_string());
        }
        if self.max_line_bytes < 16 {
            return Err("Max line bytes must be >= 16".to_string());
        }
        if self.host.trim().is_empty() {
            return Err("Host must not be empty".to_string());
        }

        Ok(())
    }

    /// Timeout de lectura/escritura de cada conexión
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Periodo de gracia al detener el pool
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Límites para la lectura de la cabecera del request
    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_line_bytes: self.max_line_bytes,
            max_headers: self.max_headers,
            head_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    /// Parámetros del pool de workers
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            policy: self.backpressure,
        }
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        info!(
            address = %self.address(),
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            backpressure = ?self.backpressure,
            idle_timeout_ms = self.idle_timeout_ms,
            request_timeout_ms = self.request_timeout_ms,
            shutdown_grace_ms = self.shutdown_grace_ms,
            max_headers = self.max_headers,
            max_line_bytes = self.max_line_bytes,
            "Configuration"
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            workers: 10,
            queue_capacity: 64,
            backpressure: BackpressurePolicy::Block,
            idle_timeout_ms: 30_000,
            request_timeout_ms: 60_000,
            shutdown_grace_ms: 5_000,
            max_headers: 100,
            max_line_bytes: 8192,
            log_level: "info".to_string(),
        }
    }
}
