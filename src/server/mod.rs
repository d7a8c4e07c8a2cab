//! # Servidor
//! src/server/mod.rs
//!
//! Ciclo de vida del servidor y coordinación entre listener y pool.
//!
//! ```text
//! Stopped ──start()──► Starting ──bind ok──► Running ──stop()──► Stopping ──► Stopped
//!                          │
//!                          └──bind falla──► Stopped (ServerError::Bind)
//! ```
//!
//! `start()` bloquea el thread que lo llama corriendo el accept loop.
//! `stop()` se puede llamar desde cualquier otro thread y retorna cuando el
//! puerto ya fue liberado y el pool terminó (o venció su periodo de gracia).

pub mod connection;
pub mod listener;
pub mod pool;

use crate::config::Config;
use crate::error::ServerError;
use crate::router::Router;
use connection::ConnectionHandler;
use listener::Listener;
use pool::WorkerPool;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Estados del ciclo de vida
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Stopped => "Stopped",
            ServerState::Starting => "Starting",
            ServerState::Running => "Running",
            ServerState::Stopping => "Stopping",
        };
        write!(f, "{}", name)
    }
}

/// Lo que solo existe mientras el servidor corre
struct Lifecycle {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    pool: Option<Arc<WorkerPool<TcpStream>>>,
}

struct Inner {
    config: Config,
    router: Arc<Router>,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,

    /// Lo observa el accept loop al volver de cada `accept`
    shutdown: AtomicBool,
}

/// Servidor HTTP/1.1 concurrente
///
/// Clonar un `Server` da otro handle al mismo servidor, así un thread puede
/// correr `start()` y otro llamar `stop()`.
///
/// # Ejemplo
///
/// ```no_run
/// use hello_server::config::Config;
/// use hello_server::server::Server;
/// use std::thread;
///
/// let server = Server::new(Config::default());
/// let handle = server.clone();
/// let runner = thread::spawn(move || handle.start());
///
/// // ... más tarde, desde otro thread
/// server.stop();
/// runner.join().unwrap().unwrap();
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Servidor con la tabla de rutas por defecto
    pub fn new(config: Config) -> Self {
        Self::with_router(config, Router::with_default_routes())
    }

    /// Servidor con un router propio
    pub fn with_router(config: Config, router: Router) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                router: Arc::new(router),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::Stopped,
                    local_addr: None,
                    pool: None,
                }),
                changed: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Hace bind, arranca el pool y corre el accept loop en este thread
    ///
    /// Retorna `Ok(())` cuando `stop()` terminó el loop.
    ///
    /// # Errores
    ///
    /// - `InvalidConfig` si la configuración no es válida
    /// - `InvalidState` si el servidor no está en `Stopped`
    /// - `Bind` si el puerto no está disponible
    /// - `Io` si no se pudieron crear los workers
    pub fn start(&self) -> Result<(), ServerError> {
        let config = &self.inner.config;
        config.validate().map_err(ServerError::InvalidConfig)?;

        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != ServerState::Stopped {
                return Err(ServerError::InvalidState(lifecycle.state));
            }
            lifecycle.state = ServerState::Starting;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        self.inner.changed.notify_all();

        let address = config.address();
        info!(address = %address, "Starting server");

        let listener = match Listener::bind(&address) {
            Ok(listener) => listener,
            Err(e) => {
                self.finish();
                return Err(e);
            }
        };

        let handler = ConnectionHandler::new(
            Arc::clone(&self.inner.router),
            config.request_limits(),
            config.idle_timeout(),
        );
        let pool = match WorkerPool::new(config.pool_config(), move |stream: TcpStream| {
            handler.handle(stream)
        }) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                self.finish();
                return Err(e.into());
            }
        };

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = ServerState::Running;
            lifecycle.local_addr = Some(listener.local_addr());
            lifecycle.pool = Some(Arc::clone(&pool));
        }
        self.inner.changed.notify_all();

        info!(
            address = %listener.local_addr(),
            workers = pool.size(),
            queue_capacity = pool.capacity(),
            backpressure = ?pool.policy(),
            "Server listening"
        );

        listener.run(&pool, &self.inner.shutdown);

        self.lifecycle().state = ServerState::Stopping;
        self.inner.changed.notify_all();

        // Soltar el listener libera el puerto antes de esperar al pool
        drop(listener);

        let report = pool.shutdown(config.shutdown_grace());
        info!(
            joined = report.joined,
            detached = report.detached,
            dropped = report.dropped,
            "Server stopped"
        );

        self.finish();
        Ok(())
    }

    /// Detiene el servidor y espera a que llegue a `Stopped`
    ///
    /// Idempotente y seguro desde cualquier thread. Si el servidor está
    /// arrancando, espera a que termine de arrancar antes de detenerlo.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();

        loop {
            match lifecycle.state {
                ServerState::Stopped => return,
                ServerState::Starting | ServerState::Stopping => {
                    lifecycle = self.wait(lifecycle);
                }
                ServerState::Running => {
                    info!("Stopping server");
                    lifecycle.state = ServerState::Stopping;
                    self.inner.shutdown.store(true, Ordering::SeqCst);

                    let waker = lifecycle.local_addr.map(listener::wake_addr);
                    let pool = lifecycle.pool.clone();
                    drop(lifecycle);
                    self.inner.changed.notify_all();

                    // Un accept loop bloqueado en `submit` sale con `Closed`
                    if let Some(pool) = pool {
                        pool.close();
                    }
                    match waker {
                        Some(addr) => listener::wake(addr),
                        None => warn!("Running server without a local address"),
                    }

                    lifecycle = self.lifecycle();
                }
            }
        }
    }

    /// Estado actual
    pub fn state(&self) -> ServerState {
        self.lifecycle().state
    }

    /// Dirección efectiva mientras el servidor corre
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle().local_addr
    }

    /// Espera hasta que el servidor esté en `Running`
    ///
    /// Retorna la dirección efectiva, o `None` si venció el timeout.
    pub fn wait_until_running(&self, timeout: Duration) -> Option<SocketAddr> {
        let deadline = Instant::now() + timeout;
        let mut lifecycle = self.lifecycle();

        while lifecycle.state != ServerState::Running {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            lifecycle = self
                .inner
                .changed
                .wait_timeout(lifecycle, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        lifecycle.local_addr
    }

    /// Vuelve a `Stopped` y despierta a quien espere en `stop()`
    fn finish(&self) {
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = ServerState::Stopped;
            lifecycle.local_addr = None;
            lifecycle.pool = None;
        }
        self.inner.changed.notify_all();
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Lifecycle>) -> MutexGuard<'a, Lifecycle> {
        self.inner
            .changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}
