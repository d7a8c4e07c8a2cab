//! # Parsing de Requests HTTP/1.1
//! src/http/request.rs
//!
//! Solo se interpreta la request line. Los headers se leen y se descartan
//! (con límites de tamaño) y nunca se lee un body.
//!
//! ## Formato de un Request
//!
//! ```text
//! GET /api/hello HTTP/1.1\r\n
//! Host: localhost:8080\r\n
//! User-Agent: curl/8.5.0\r\n
//! \r\n
//! ```
//!
//! 1. **Request Line**: `METHOD PATH [VERSION]` (la versión se ignora)
//! 2. **Headers**: se consumen hasta la línea vacía o EOF
//! 3. **Body**: no se lee

use super::StatusCode;
use std::io::{self, BufRead, Read};
use std::time::Duration;

/// Límites aplicados mientras se lee la cabecera de un request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Longitud máxima de cualquier línea (sin contar `\r\n`)
    pub max_line_bytes: usize,

    /// Número máximo de líneas de header
    pub max_headers: usize,

    /// Tiempo total para recibir la cabecera completa. `read_head` no lo
    /// aplica; lo aplica quien lee del socket.
    pub head_timeout: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 8192,
            max_headers: 100,
            head_timeout: Duration::from_secs(60),
        }
    }
}

/// Request line parseada: `{method, path}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Método tal como lo envió el cliente (ej: "GET")
    method: String,

    /// Path exacto, sin interpretar query strings (ej: "/api/hello")
    path: String,
}

/// Errores que pueden ocurrir durante el parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Menos de dos tokens en la request line
    InvalidRequestLine(String),

    /// La request line no es UTF-8 válido
    InvalidEncoding,

    /// La request line supera el límite de bytes
    RequestLineTooLong(usize),

    /// Una línea de header supera el límite de bytes
    HeaderTooLong(usize),

    /// Se superó el número máximo de headers
    TooManyHeaders(usize),
}

impl ParseError {
    /// Código de estado con el que se responde a este error
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::InvalidRequestLine(_)
            | ParseError::InvalidEncoding
            | ParseError::RequestLineTooLong(_) => StatusCode::BadRequest,
            ParseError::HeaderTooLong(_) | ParseError::TooManyHeaders(_) => {
                StatusCode::RequestHeaderFieldsTooLarge
            }
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidRequestLine(l) => write!(f, "Invalid request line: {:?}", l),
            ParseError::InvalidEncoding => write!(f, "Request line is not valid UTF-8"),
            ParseError::RequestLineTooLong(max) => {
                write!(f, "Request line exceeds {} bytes", max)
            }
            ParseError::HeaderTooLong(max) => write!(f, "Header line exceeds {} bytes", max),
            ParseError::TooManyHeaders(max) => write!(f, "More than {} header lines", max),
        }
    }
}

impl std::error::Error for ParseError {}

impl RequestLine {
    /// Parsea la request line (primera línea del request)
    ///
    /// Formato: `GET /path HTTP/1.1`. Se separa por whitespace; el tercer
    /// token y los siguientes se ignoran.
    ///
    /// # Ejemplo
    ///
    /// ```
    /// use hello_server::http::RequestLine;
    ///
    /// let line = RequestLine::parse("GET /api/hello HTTP/1.1").unwrap();
    /// assert_eq!(line.method(), "GET");
    /// assert_eq!(line.path(), "/api/hello");
    ///
    /// assert!(RequestLine::parse("GET").is_err());
    /// ```
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();

        match (parts.next(), parts.next()) {
            (Some(method), Some(path)) => Ok(RequestLine {
                method: method.to_string(),
                path: path.to_string(),
            }),
            _ => Err(ParseError::InvalidRequestLine(line.to_string())),
        }
    }

    /// Obtiene el método HTTP del request
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Obtiene el path del request
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Resultado de leer una línea con límite de tamaño
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// El peer cerró antes de enviar un solo byte
    Eof,
    /// Línea completa, sin el terminador
    Line(Vec<u8>),
    /// La línea superó el límite
    TooLong,
}

/// Lee una línea terminada en `\n` sin acumular más de `max` bytes de contenido
fn read_bounded_line<R: BufRead>(reader: &mut R, max: usize) -> io::Result<LineRead> {
    let limit = max as u64 + 2;
    let mut buf = Vec::new();
    let n = reader.by_ref().take(limit).read_until(b'\n', &mut buf)?;

    if n == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n as u64 == limit {
        return Ok(LineRead::TooLong);
    }

    if buf.len() > max {
        return Ok(LineRead::TooLong);
    }

    Ok(LineRead::Line(buf))
}

/// Consume los headers hasta la línea vacía o EOF, sin guardarlos
///
/// Retorna `Ok(Err(_))` si la sección de headers excede los límites.
pub fn skip_headers<R: BufRead>(
    reader: &mut R,
    limits: &RequestLimits,
) -> io::Result<Result<(), ParseError>> {
    let mut count = 0;

    loop {
        match read_bounded_line(reader, limits.max_line_bytes)? {
            LineRead::Eof => return Ok(Ok(())),
            LineRead::TooLong => {
                return Ok(Err(ParseError::HeaderTooLong(limits.max_line_bytes)))
            }
            LineRead::Line(line) if line.is_empty() => return Ok(Ok(())),
            LineRead::Line(_) => {
                count += 1;
                if count > limits.max_headers {
                    return Ok(Err(ParseError::TooManyHeaders(limits.max_headers)));
                }
            }
        }
    }
}

/// Lee la cabecera completa de un request: request line + headers descartados
///
/// # Retorna
///
/// * `Ok(None)` - El cliente cerró sin enviar datos
/// * `Ok(Some(Ok(line)))` - Request line válida y headers consumidos
/// * `Ok(Some(Err(e)))` - Request malformado; se debe responder `e.status()`
/// * `Err(io)` - Error de I/O (incluye timeouts de lectura)
pub fn read_head<R: BufRead>(
    reader: &mut R,
    limits: &RequestLimits,
) -> io::Result<Option<Result<RequestLine, ParseError>>> {
    let raw = match read_bounded_line(reader, limits.max_line_bytes)? {
        LineRead::Eof => return Ok(None),
        LineRead::TooLong => {
            return Ok(Some(Err(ParseError::RequestLineTooLong(
                limits.max_line_bytes,
            ))))
        }
        LineRead::Line(raw) => raw,
    };

    let parsed = std::str::from_utf8(&raw)
        .map_err(|_| ParseError::InvalidEncoding)
        .and_then(RequestLine::parse);

    match parsed {
        Ok(line) => Ok(Some(skip_headers(reader, limits)?.map(|()| line))),
        Err(e) => {
            // El 400 ya está decidido; vaciar los headers es solo cortesía
            let _ = skip_headers(reader, limits);
            Ok(Some(Err(e)))
        }
    }
}
