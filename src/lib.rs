//! # Hello Server
//! src/lib.rs
//!
//! Listener HTTP/1.1 concurrente mínimo: acepta conexiones TCP, las reparte
//! en un pool fijo de workers, lee la request line y responde con una de
//! dos respuestas fijas antes de cerrar la conexión.
//!
//! ## Arquitectura
//!
//! - `http`: request line, respuestas y códigos de estado
//! - `router`: tabla `(method, path)` → respuesta
//! - `server`: ciclo de vida, listener, pool de workers y manejo de conexiones
//! - `config`: argumentos CLI y variables de entorno
//! - `error`: errores de la API del servidor
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use hello_server::config::Config;
//! use hello_server::server::Server;
//!
//! let server = Server::new(Config::default());
//! server.start().expect("Error al iniciar servidor");
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod router;
pub mod server;

pub use error::ServerError;
