//! # Manejo de una Conexión
//! src/server/connection.rs
//!
//! Cada worker ejecuta [`ConnectionHandler::handle`] sobre una conexión:
//!
//! 1. Lee la request line (si el cliente cerró sin datos, no se responde)
//! 2. Parsea `{method, path}`; si está malformada se responde 400
//! 3. Descarta los headers hasta la línea vacía
//! 4. Resuelve la respuesta en el router
//! 5. Escribe la respuesta
//! 6. Cierra la conexión (al soltar el `TcpStream`, en cualquier camino)

use crate::http::request::read_head;
use crate::http::{RequestLimits, Response, StatusCode};
use crate::router::Router;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Qué pasó con una conexión atendida
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// El cliente cerró antes de enviar la request line
    PeerClosed,
    /// Se escribió una respuesta completa con este código
    Responded(StatusCode),
}

/// Atiende conexiones individuales: lectura, routing y respuesta
#[derive(Clone)]
pub struct ConnectionHandler {
    router: Arc<Router>,
    limits: RequestLimits,
    idle_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(router: Arc<Router>, limits: RequestLimits, idle_timeout: Duration) -> Self {
        Self {
            router,
            limits,
            idle_timeout,
        }
    }

    /// Atiende una conexión y la cierra
    ///
    /// Nunca falla: los errores de I/O se registran y la conexión se cierra
    /// sin respuesta.
    pub fn handle(&self, stream: TcpStream) {
        let start = Instant::now();
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        match self.serve(&stream) {
            Ok(Outcome::Responded(status)) => {
                debug!(
                    peer = %peer,
                    status = status.as_u16(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "Response sent"
                );
            }
            Ok(Outcome::PeerClosed) => trace!(peer = %peer, "Connection closed by client"),
            Err(e) if is_timeout(&e) => {
                debug!(
                    peer = %peer,
                    idle_timeout_ms = self.idle_timeout.as_millis() as u64,
                    head_timeout_ms = self.limits.head_timeout.as_millis() as u64,
                    "Request timed out"
                );
            }
            Err(e) => warn!(peer = %peer, error = %e, "Connection error"),
        }
    }

    /// Lee un request, escribe su respuesta y retorna el resultado
    ///
    /// La conexión no se cierra aquí; la cierra quien sea dueño del stream.
    pub fn serve(&self, stream: &TcpStream) -> io::Result<Outcome> {
        stream.set_write_timeout(Some(self.idle_timeout))?;

        let mut reader = BufReader::new(DeadlineReader {
            stream,
            deadline: Instant::now().checked_add(self.limits.head_timeout),
            idle_timeout: self.idle_timeout,
        });

        let response = match read_head(&mut reader, &self.limits)? {
            None => return Ok(Outcome::PeerClosed),
            Some(Ok(line)) => {
                trace!(method = line.method(), path = line.path(), "Request");
                self.router.resolve(line.method(), line.path())
            }
            Some(Err(e)) => {
                debug!(error = %e, "Malformed request");
                Response::plain(e.status())
            }
        };

        let mut writer = stream;
        writer.write_all(&response.to_bytes())?;
        writer.flush()?;

        discard_pending(stream);

        Ok(Outcome::Responded(response.status()))
    }
}

/// Lectura de la cabecera con un plazo total además del idle timeout
///
/// Cada `read` espera a lo sumo lo que quede del plazo o el idle timeout, lo
/// que sea menor. Un cliente que envía un byte a la vez no retiene al
/// worker más allá del plazo.
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Option<Instant>,
    idle_timeout: Duration,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "request head deadline expired",
                    ));
                }
                remaining.min(self.idle_timeout)
            }
            None => self.idle_timeout,
        };

        self.stream.set_read_timeout(Some(timeout))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// Máximo de bytes sin leer que se descartan antes de cerrar
const DRAIN_BUDGET: usize = 64 * 1024;

/// Descarta lo que el cliente ya envió y no se leyó (headers sobrantes, body)
///
/// Cerrar un socket con datos pendientes genera un RST, y el RST puede hacer
/// que el cliente pierda la respuesta. Solo se lee lo que ya llegó.
fn discard_pending(stream: &TcpStream) {
    if stream.set_nonblocking(true).is_err() {
        return;
    }

    let mut reader = stream;
    let mut scratch = [0u8; 4096];
    let mut budget = DRAIN_BUDGET;

    while budget > 0 {
        match reader.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => budget = budget.saturating_sub(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Respuesta 503 para conexiones que el pool no pudo aceptar
pub fn service_unavailable() -> Response {
    Response::plain(StatusCode::ServiceUnavailable).with_header("Retry-After", "1")
}

/// Escribe un 503 en una conexión rechazada y la cierra
///
/// Se ejecuta en el thread del accept loop, así que el write lleva un
/// timeout corto.
pub fn reject(stream: TcpStream, timeout: Duration) {
    let result = stream
        .set_write_timeout(Some(timeout))
        .and_then(|()| (&stream).write_all(&service_unavailable().to_bytes()));

    match result {
        Ok(()) => discard_pending(&stream),
        Err(e) => debug!(error = %e, "Failed to write 503"),
    }
}

/// `set_read_timeout` reporta el vencimiento como `WouldBlock` en Unix y
/// como `TimedOut` en Windows
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Shutdown, TcpListener};
    use std::thread;

    fn handler(idle_timeout: Duration) -> ConnectionHandler {
        ConnectionHandler::new(
            Arc::new(Router::with_default_routes()),
            RequestLimits::default(),
            idle_timeout,
        )
    }

    /// Acepta una conexión, la atiende con `serve` y devuelve lo que leyó el cliente
    fn exchange(raw: &[u8], idle_timeout: Duration) -> (io::Result<Outcome>, String) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handler(idle_timeout).serve(&stream)
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(raw).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();

        (server.join().unwrap(), String::from_utf8_lossy(&buf).to_string())
    }

    #[test]
    fn test_hello_ok() {
        let (outcome, text) = exchange(
            b"GET /api/hello HTTP/1.1\r\nHost: localhost\r\n\r\n",
            Duration::from_secs(5),
        );

        assert_eq!(outcome.unwrap(), Outcome::Responded(StatusCode::Ok));
        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 28\r\n\r\n{\"message\": \"Hello, World!\"}"
        );
    }

    #[test]
    fn test_post_is_not_found() {
        let (outcome, text) = exchange(b"POST /api/hello HTTP/1.1\r\n\r\n", Duration::from_secs(5));

        assert_eq!(outcome.unwrap(), Outcome::Responded(StatusCode::NotFound));
        assert_eq!(
            text,
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\nNot Found"
        );
    }

    #[test]
    fn test_single_token_is_bad_request() {
        let (outcome, text) = exchange(b"GET\r\n\r\n", Duration::from_secs(5));

        assert_eq!(outcome.unwrap(), Outcome::Responded(StatusCode::BadRequest));
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.ends_with("\r\n\r\nBad Request"));
    }

    #[test]
    fn test_request_without_blank_line() {
        // El cliente cierra su lado antes de terminar los headers
        let (outcome, text) = exchange(b"GET /api/hello HTTP/1.1\r\nHost: x\r\n", Duration::from_secs(5));

        assert_eq!(outcome.unwrap(), Outcome::Responded(StatusCode::Ok));
        assert!(text.starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn test_too_many_headers() {
        let mut raw = b"GET /api/hello HTTP/1.1\r\n".to_vec();
        for i in 0..150 {
            raw.extend_from_slice(format!("X-H{}: v\r\n", i).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");

        let (outcome, text) = exchange(&raw, Duration::from_secs(5));
        assert_eq!(
            outcome.unwrap(),
            Outcome::Responded(StatusCode::RequestHeaderFieldsTooLarge)
        );
        assert!(text.starts_with("HTTP/1.1 431 "));
    }

    #[test]
    fn test_peer_closed_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handler(Duration::from_secs(5)).serve(&stream)
        });

        // Cliente que conecta y cierra sin mandar datos
        drop(TcpStream::connect(addr).unwrap());

        assert_eq!(server.join().unwrap().unwrap(), Outcome::PeerClosed);
    }

    #[test]
    fn test_idle_client_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let start = Instant::now();
            let result = handler(Duration::from_millis(100)).serve(&stream);
            (result, start.elapsed())
        });

        // Mantener el cliente abierto sin enviar nada
        let _client = TcpStream::connect(addr).unwrap();

        let (result, elapsed) = server.join().unwrap();
        let err = result.unwrap_err();
        assert!(is_timeout(&err), "unexpected error kind: {:?}", err.kind());
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_slow_client_hits_head_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let handler = ConnectionHandler::new(
                Arc::new(Router::with_default_routes()),
                RequestLimits {
                    head_timeout: Duration::from_millis(300),
                    ..RequestLimits::default()
                },
                Duration::from_secs(5),
            );
            let start = Instant::now();
            let result = handler.serve(&stream);
            (result, start.elapsed())
        });

        // Un header nuevo cada 50 ms: nunca se vence el idle timeout
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"GET /api/hello HTTP/1.1\r\n").unwrap();
        let drip = thread::spawn(move || {
            for i in 0..60 {
                if client.write_all(format!("X-{}: 1\r\n", i).as_bytes()).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        });

        let (result, elapsed) = server.join().unwrap();
        let err = result.unwrap_err();
        assert!(is_timeout(&err), "unexpected error kind: {:?}", err.kind());
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);

        drip.join().unwrap();
    }

    #[test]
    fn test_handle_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handler(Duration::from_secs(5)).handle(stream);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        // Sin shutdown de escritura: el servidor debe cerrar por su cuenta
        client.write_all(b"GET /nope HTTP/1.1\r\n\r\n").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 404 Not Found"));

        server.join().unwrap();
    }

    #[test]
    fn test_reject_writes_503() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            reject(stream, Duration::from_secs(1));
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf);

        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("Retry-After: 1\r\n"));

        server.join().unwrap();
    }
}
