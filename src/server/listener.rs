//! # Listener TCP
//! src/server/listener.rs
//!
//! Dueño del socket de escucha. `run` hace el accept loop y entrega cada
//! conexión al pool; nunca atiende conexiones por sí mismo (salvo el 503
//! cuando el pool las rechaza).
//!
//! Un `accept` bloqueado no se despierta al cambiar una bandera, así que
//! `stop()` marca el shutdown y luego se conecta al propio listener
//! ([`wake`]) para que el loop vea la bandera y salga.

use crate::error::ServerError;
use crate::server::connection;
use crate::server::pool::{SubmitError, WorkerPool};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Timeout del write del 503 (corre en el thread del accept loop)
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout de la conexión que despierta al accept loop
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pausa tras un error de accept (EMFILE/ENFILE se repiten hasta que se
/// libere un descriptor)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Socket de escucha ya enlazado
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Hace bind en `addr` (ej: "127.0.0.1:8080")
    ///
    /// # Errores
    ///
    /// `ServerError::Bind` si la dirección es inválida o el puerto está ocupado.
    pub fn bind(addr: &str) -> Result<Self, ServerError> {
        let inner = TcpListener::bind(addr).map_err(|e| ServerError::bind(addr, e))?;
        let local_addr = inner
            .local_addr()
            .map_err(|e| ServerError::bind(addr, e))?;

        Ok(Self { inner, local_addr })
    }

    /// Dirección efectiva (útil con puerto 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop
    ///
    /// Termina cuando `shutdown` está activo al volver de `accept` o cuando el
    /// pool ya no acepta trabajo. Los errores de accept se registran y el
    /// loop sigue.
    pub fn run(&self, pool: &WorkerPool<TcpStream>, shutdown: &AtomicBool) {
        for stream in self.inner.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                // Conexión de wake-up (o un cliente que llegó tarde)
                break;
            }

            match stream {
                Ok(stream) => {
                    if let Ok(peer) = stream.peer_addr() {
                        trace!(peer = %peer, "Accepted connection");
                    }

                    match pool.submit(stream) {
                        Ok(()) => {}
                        Err(SubmitError::Full(stream)) => {
                            warn!(
                                capacity = pool.capacity(),
                                "Worker pool saturated, rejecting connection"
                            );
                            connection::reject(stream, REJECT_WRITE_TIMEOUT);
                        }
                        Err(SubmitError::Closed(_)) => {
                            debug!("Worker pool closed, leaving accept loop");
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    thread::sleep(ACCEPT_ERROR_BACKOFF);
                }
            }
        }
    }
}

/// Las direcciones no especificadas (0.0.0.0, ::) no se pueden marcar;
/// se usa el loopback de la misma familia
pub fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

/// Despierta a un accept loop bloqueado conectándose a él
pub fn wake(addr: SocketAddr) {
    if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
        // El loop pudo haber terminado ya por su cuenta
        debug!(addr = %addr, error = %e, "Wake-up connection failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::pool::{BackpressurePolicy, PoolConfig};
    use std::io::{Read, Write};
    use std::sync::Arc;

    fn echo_pool(policy: BackpressurePolicy) -> WorkerPool<TcpStream> {
        let config = PoolConfig {
            workers: 2,
            queue_capacity: 4,
            policy,
        };
        WorkerPool::new(config, |mut stream: TcpStream| {
            let _ = stream.write_all(b"hi");
        })
        .unwrap()
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1:0").unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[test]
    fn test_bind_busy_port() {
        let first = Listener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().to_string();

        match Listener::bind(&addr) {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected bind error, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_invalid_address() {
        assert!(matches!(
            Listener::bind("not-an-address"),
            Err(ServerError::Bind { .. })
        ));
    }

    #[test]
    fn test_wake_addr_maps_unspecified() {
        let v4: SocketAddr = "0.0.0.0:9000".parse().unwrap();
        let v6: SocketAddr = "[::]:9000".parse().unwrap();
        let fixed: SocketAddr = "10.0.0.1:9000".parse().unwrap();

        assert_eq!(wake_addr(v4), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(wake_addr(v6), "[::1]:9000".parse().unwrap());
        assert_eq!(wake_addr(fixed), fixed);
    }

    #[test]
    fn test_run_dispatches_and_stops() {
        let listener = Arc::new(Listener::bind("127.0.0.1:0").unwrap());
        let addr = listener.local_addr();
        let shutdown = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(echo_pool(BackpressurePolicy::Block));

        let accept = {
            let listener = Arc::clone(&listener);
            let shutdown = Arc::clone(&shutdown);
            let pool = Arc::clone(&pool);
            thread::spawn(move || listener.run(&pool, &shutdown))
        };

        let mut client = TcpStream::connect(addr).unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hi");

        shutdown.store(true, Ordering::SeqCst);
        wake(wake_addr(addr));
        accept.join().unwrap();

        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_run_exits_when_pool_closed() {
        let listener = Arc::new(Listener::bind("127.0.0.1:0").unwrap());
        let addr = listener.local_addr();
        let shutdown = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(echo_pool(BackpressurePolicy::Block));
        pool.shutdown(Duration::from_secs(1));

        let accept = {
            let listener = Arc::clone(&listener);
            let shutdown = Arc::clone(&shutdown);
            let pool = Arc::clone(&pool);
            thread::spawn(move || listener.run(&pool, &shutdown))
        };

        drop(TcpStream::connect(addr).unwrap());
        accept.join().unwrap();
    }
}
