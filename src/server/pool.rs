//! # Pool de Workers
//! src/server/pool.rs
//!
//! Número fijo de threads alimentados por una cola FIFO acotada. Cada worker
//! toma un trabajo, lo ejecuta hasta terminar y recién entonces toma el
//! siguiente.
//!
//! ```text
//! submit ──► [ cola acotada ] ──► worker-0 ──► handler(job)
//!                              ──► worker-1 ──► handler(job)
//!                              ──► ...
//! ```
//!
//! Cuando la cola está llena se aplica la [`BackpressurePolicy`]: bloquear
//! al que envía o devolverle el trabajo. Nunca se descarta trabajo en
//! silencio.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Política cuando la cola del pool está llena
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackpressurePolicy {
    /// `submit` espera a que se libere un lugar
    Block,
    /// `submit` devuelve el trabajo con [`SubmitError::Full`]
    Reject,
}

/// Parámetros del pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Número de workers
    pub workers: usize,
    /// Trabajos que pueden esperar en cola
    pub queue_capacity: usize,
    /// Qué hacer con la cola llena
    pub policy: BackpressurePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 64,
            policy: BackpressurePolicy::Block,
        }
    }
}

/// Trabajo no aceptado por el pool; se devuelve al llamador
pub enum SubmitError<T> {
    /// Cola llena con política `Reject`
    Full(T),
    /// El pool ya fue detenido
    Closed(T),
}

impl<T> std::fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Full(_) => write!(f, "Full(..)"),
            SubmitError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> std::fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Full(_) => write!(f, "Worker pool queue is full"),
            SubmitError::Closed(_) => write!(f, "Worker pool is shut down"),
        }
    }
}

impl<T> std::error::Error for SubmitError<T> {}

/// Resultado de [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers que terminaron dentro del periodo de gracia
    pub joined: usize,
    /// Workers que seguían ocupados al vencer el plazo
    pub detached: usize,
    /// Trabajos en cola que se descartaron sin ejecutar
    pub dropped: usize,
}

struct Queue<T> {
    jobs: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,

    /// Workers vivos; llega a 0 cuando todos salieron de su loop
    live: Mutex<usize>,
    all_exited: Condvar,
}

/// Un lock envenenado solo indica que un handler hizo panic; el estado
/// protegido sigue siendo consistente.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pool de tamaño fijo que ejecuta `handler(job)` para cada trabajo enviado
pub struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    policy: BackpressurePolicy,
    size: usize,
    shut_down: AtomicBool,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Crea el pool y arranca sus workers
    ///
    /// # Errores
    ///
    /// Falla si el sistema no permite crear alguno de los threads; los que
    /// ya arrancaron se detienen.
    pub fn new<F>(config: PoolConfig, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::with_capacity(config.queue_capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: config.queue_capacity.max(1),
            live: Mutex::new(0),
            all_exited: Condvar::new(),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            policy: config.policy,
            size: config.workers,
            shut_down: AtomicBool::new(false),
        };

        let handler = Arc::new(handler);
        for id in 0..config.workers {
            let shared = Arc::clone(&pool.shared);
            let handler = Arc::clone(&handler);

            *lock(&pool.shared.live) += 1;
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker_loop(id, shared, handler));

            match spawned {
                Ok(handle) => lock(&pool.workers).push(handle),
                Err(e) => {
                    *lock(&pool.shared.live) -= 1;
                    pool.close();
                    return Err(e);
                }
            }
        }

        debug!(workers = config.workers, capacity = config.queue_capacity, "Worker pool started");
        Ok(pool)
    }

    /// Envía un trabajo al pool
    ///
    /// Con `Block` espera mientras la cola esté llena; con `Reject` devuelve
    /// el trabajo inmediatamente. Tras `shutdown` siempre devuelve `Closed`.
    pub fn submit(&self, job: T) -> Result<(), SubmitError<T>> {
        let mut queue = lock(&self.shared.queue);

        loop {
            if queue.closed {
                return Err(SubmitError::Closed(job));
            }

            if queue.jobs.len() < self.shared.capacity {
                queue.jobs.push_back(job);
                drop(queue);
                self.shared.not_empty.notify_one();
                return Ok(());
            }

            match self.policy {
                BackpressurePolicy::Reject => return Err(SubmitError::Full(job)),
                BackpressurePolicy::Block => {
                    queue = self
                        .shared
                        .not_full
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Detiene el pool
    ///
    /// Deja de aceptar trabajo y espera hasta `grace` a que los workers
    /// vacíen la cola y terminen. Al vencer el plazo, los trabajos que
    /// siguen en cola se descartan y los workers ocupados quedan
    /// desacoplados (terminan solos cuando su trabajo actual termine).
    /// Llamadas posteriores no hacen nada.
    pub fn shutdown(&self, grace: Duration) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }

        self.close();

        let remaining = {
            let live = lock(&self.shared.live);
            let (live, _) = self
                .shared
                .all_exited
                .wait_timeout_while(live, grace, |n| *n > 0)
                .unwrap_or_else(PoisonError::into_inner);
            *live
        };

        let mut report = ShutdownReport::default();

        if remaining > 0 {
            let abandoned: Vec<T> = lock(&self.shared.queue).jobs.drain(..).collect();
            report.dropped = abandoned.len();
            // Se sueltan fuera del lock
            drop(abandoned);
        }

        let handles: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            if remaining == 0 || handle.is_finished() {
                if handle.join().is_err() {
                    error!("Worker thread panicked outside of a job");
                }
                report.joined += 1;
            } else {
                report.detached += 1;
            }
        }

        if report.detached > 0 || report.dropped > 0 {
            warn!(
                detached = report.detached,
                dropped = report.dropped,
                grace_ms = grace.as_millis() as u64,
                "Worker pool grace period expired"
            );
        } else {
            info!(joined = report.joined, "Worker pool drained");
        }

        report
    }

    /// Trabajos esperando en cola
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).jobs.len()
    }
}

impl<T> WorkerPool<T> {
    /// Número de workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacidad de la cola
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Política de backpressure
    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Cierra la cola sin esperar a nadie
    ///
    /// Los `submit` bloqueados y los futuros reciben `Closed`; los workers
    /// terminan lo que quede en cola y salen.
    pub fn close(&self) {
        lock(&self.shared.queue).closed = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        // Los workers terminan la cola pendiente y salen solos
        self.close();
    }
}

/// Loop principal del worker
fn worker_loop<T, F>(id: usize, shared: Arc<Shared<T>>, handler: Arc<F>)
where
    F: Fn(T),
{
    debug!(worker = id, "Worker started");

    loop {
        let job = {
            let mut queue = lock(&shared.queue);
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.closed {
                    break None;
                }
                queue = shared
                    .not_empty
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(job) = job else { break };
        shared.not_full.notify_one();

        if panic::catch_unwind(AssertUnwindSafe(|| (*handler)(job))).is_err() {
            error!(worker = id, "Job panicked; worker continues");
        }
    }

    debug!(worker = id, "Worker stopped");

    let mut live = lock(&shared.live);
    *live -= 1;
    if *live == 0 {
        shared.all_exited.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Barrier;
    use std::time::Instant;

    fn config(workers: usize, queue_capacity: usize, policy: BackpressurePolicy) -> PoolConfig {
        PoolConfig {
            workers,
            queue_capacity,
            policy,
        }
    }

    #[test]
    fn test_pool_runs_every_job() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new(config(4, 8, BackpressurePolicy::Block), move |n: u32| {
            lock(&tx).send(n).unwrap();
        })
        .unwrap();

        for n in 0..100 {
            pool.submit(n).unwrap();
        }

        let report = pool.shutdown(Duration::from_secs(5));
        let mut seen: Vec<u32> = rx.try_iter().collect();
        seen.sort();

        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert_eq!(report.joined, 4);
        assert_eq!(report.detached, 0);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn test_workers_run_in_parallel() {
        let barrier = Arc::new(Barrier::new(4));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let b = Arc::clone(&barrier);
        let pool = WorkerPool::new(config(3, 8, BackpressurePolicy::Block), move |_: ()| {
            // Solo se libera si 3 jobs están en ejecución al mismo tiempo
            b.wait();
            lock(&tx).send(()).unwrap();
        })
        .unwrap();

        for _ in 0..3 {
            pool.submit(()).unwrap();
        }
        barrier.wait();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        pool.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_reject_policy_returns_job() {
        let gate = Arc::new(Barrier::new(2));
        let g = Arc::clone(&gate);
        let pool = WorkerPool::new(config(1, 1, BackpressurePolicy::Reject), move |n: u32| {
            if n == 0 {
                g.wait();
            }
        })
        .unwrap();

        pool.submit(0).unwrap();
        // Esperar a que el worker tome el job 0 y la cola quede vacía
        let start = Instant::now();
        while pool.queued() > 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }

        pool.submit(1).unwrap();
        match pool.submit(2) {
            Err(SubmitError::Full(job)) => assert_eq!(job, 2),
            other => panic!("expected Full, got {:?}", other),
        }

        gate.wait();
        pool.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_block_policy_waits_for_room() {
        let gate = Arc::new(Barrier::new(2));
        let g = Arc::clone(&gate);
        let pool = Arc::new(
            WorkerPool::new(config(1, 1, BackpressurePolicy::Block), move |n: u32| {
                if n == 0 {
                    g.wait();
                }
            })
            .unwrap(),
        );

        pool.submit(0).unwrap();
        let start = Instant::now();
        while pool.queued() > 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        pool.submit(1).unwrap();

        let (tx, rx) = mpsc::channel();
        let p = Arc::clone(&pool);
        let submitter = thread::spawn(move || {
            let result = p.submit(2);
            tx.send(()).unwrap();
            result
        });

        // El tercer submit queda bloqueado mientras el worker está ocupado
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        gate.wait();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(submitter.join().unwrap().is_ok());

        pool.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_submit_after_shutdown_is_closed() {
        let pool = WorkerPool::new(config(2, 4, BackpressurePolicy::Block), |_: u32| {}).unwrap();
        pool.shutdown(Duration::from_secs(1));

        assert!(matches!(pool.submit(7), Err(SubmitError::Closed(7))));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::new(config(2, 4, BackpressurePolicy::Block), |_: u32| {}).unwrap();

        assert_eq!(pool.shutdown(Duration::from_secs(1)).joined, 2);
        assert_eq!(pool.shutdown(Duration::from_secs(1)), ShutdownReport::default());
    }

    #[test]
    fn test_shutdown_grace_expires() {
        let release = Arc::new(Barrier::new(2));
        let r = Arc::clone(&release);
        let pool = WorkerPool::new(config(1, 4, BackpressurePolicy::Block), move |n: u32| {
            if n == 0 {
                r.wait();
            }
        })
        .unwrap();

        pool.submit(0).unwrap();
        let start = Instant::now();
        while pool.queued() > 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        pool.submit(1).unwrap();
        pool.submit(2).unwrap();

        let report = pool.shutdown(Duration::from_millis(100));
        assert_eq!(report.detached, 1);
        assert_eq!(report.dropped, 2);

        release.wait();
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let pool = WorkerPool::new(config(1, 4, BackpressurePolicy::Block), move |n: u32| {
            if n == 0 {
                panic!("boom");
            }
            lock(&tx).send(n).unwrap();
        })
        .unwrap();

        pool.submit(0).unwrap();
        pool.submit(1).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(pool.shutdown(Duration::from_secs(5)).joined, 1);
    }

    #[test]
    fn test_pool_introspection() {
        let pool = WorkerPool::new(config(3, 9, BackpressurePolicy::Reject), |_: u32| {}).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.capacity(), 9);
        assert_eq!(pool.policy(), BackpressurePolicy::Reject);
        pool.shutdown(Duration::from_secs(1));
    }
}
