//! # Módulo HTTP
//!
//! Subconjunto mínimo de HTTP/1.1 implementado desde cero:
//!
//! - Parsing de la request line (los headers se consumen sin interpretar)
//! - Construcción y serialización de responses
//! - Códigos de estado
//!
//! No hay keep-alive, chunked transfer ni lectura de body: cada conexión
//! recibe exactamente una respuesta y se cierra.

pub mod request;   // Request line y descarte de headers
pub mod response;  // Construcción de HTTP responses
pub mod status;    // Códigos de estado HTTP

// Re-exportamos los tipos principales para facilitar su uso
pub use request::{ParseError, RequestLimits, RequestLine};
pub use response::Response;
pub use status::StatusCode;
