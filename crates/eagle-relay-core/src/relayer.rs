//! The relayer: one listening port, protocol dispatch and rate accounting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, trace, warn};

use crate::config::Switch;
use crate::connection::ConnectionInfo;
use crate::context::RelayContext;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::request::Request;
use crate::stats::Stats;
use crate::tunnel::TunnelPool;

/// Bytes read from a new connection to classify it.
pub const INITIAL_READ_SIZE: usize = 1024;

/// Interval of the speed-check loop.
pub const SPEED_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Extra time `close` waits for the accept loop beyond the drain timeout.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Accepts connections, hands each to its protocol handler and relays.
#[derive(Debug)]
pub struct Relayer {
    ctx: Arc<RelayContext>,
    pool: Arc<TunnelPool>,
    stats: Arc<Stats>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    stopped: watch::Sender<bool>,
    in_flight: InFlight,
}

impl Relayer {
    pub fn new(ctx: Arc<RelayContext>) -> Arc<Self> {
        let pool = TunnelPool::new(ctx.config().limits.max_idle_tunnels);
        Arc::new(Self {
            ctx,
            pool,
            stats: Arc::new(Stats::default()),
            running: AtomicBool::new(false),
            shutdown: watch::Sender::new(false),
            stopped: watch::Sender::new(false),
            in_flight: InFlight::default(),
        })
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    pub fn pool(&self) -> &Arc<TunnelPool> {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connections currently being handled or relayed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Bind the configured address and serve until closed.
    ///
    /// Fails only when the address cannot be bound or the relayer was
    /// already closed.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let addr = self.ctx.config().server.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.run(listener).await
    }

    /// Serve an already bound listener until closed or accept fails.
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(Error::RelayerClosed);
        }
        self.running.store(true, Ordering::SeqCst);

        match listener.local_addr() {
            Ok(addr) => info!("Relayer listening on {}", addr),
            Err(e) => warn!("Relayer listening on unknown address: {}", e),
        }

        if self.ctx.config().speed_check.is_on() {
            tokio::spawn(Arc::clone(self).check_speed_of_users());
        }

        while self.is_running() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let guard = self.in_flight.enter();
                        let relayer = Arc::clone(self);
                        tokio::spawn(async move {
                            relayer.handle_client(stream, peer).await;
                            drop(guard);
                        });
                    }
                    Err(e) => {
                        error!("Stop accepting: {}", e);
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        self.running.store(false, Ordering::SeqCst);

        let drain_timeout = self.ctx.config().limits.drain_timeout();
        if !self.in_flight.wait_idle(drain_timeout).await {
            warn!(
                "Closing listener with {} connections still in flight",
                self.in_flight.count()
            );
        }
        drop(listener);
        self.stopped.send_replace(true);
        info!("Relayer stopped");
        Ok(())
    }

    /// Stop accepting, drain in-flight connections and close the listener.
    ///
    /// Waits for the accept loop to acknowledge, bounded by the drain
    /// timeout. Calling it again, or before `run`, only marks the relayer
    /// closed.
    pub async fn close(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        if !was_running {
            return;
        }

        let mut stopped = self.stopped.subscribe();
        let limit = self.ctx.config().limits.drain_timeout() + STOP_GRACE;
        if tokio::time::timeout(limit, stopped.wait_for(|stopped| *stopped))
            .await
            .is_err()
        {
            warn!("Relayer did not stop within {:?}", limit);
        }
    }

    async fn handle_client(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut buffer = vec![0u8; INITIAL_READ_SIZE];
        let count = match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buffer.truncate(count);

        let request = Request::new(buffer);
        let mut tunnel = self.pool.acquire();
        tunnel.bind_left(stream);

        let Some(handler) = Handler::select(request.kind(), &self.ctx.config().protocols) else {
            trace!("Dropping {:?} connection from {}", request.kind(), peer);
            tunnel.close().await;
            return;
        };

        if let Err(e) = handler.handle(&request, &mut tunnel, &self.ctx).await {
            tunnel.close().await;
            if should_report(&e, self.ctx.config().debug) {
                warn!("{:?} connection from {} failed: {}", handler.protocol(), peer, e);
            }
            return;
        }

        if tunnel.user().is_none() {
            tunnel.set_user(Arc::clone(self.ctx.local_user()));
        }
        let (target_addr, target_port) = tunnel
            .target()
            .map(|t| (t.host.clone(), t.port))
            .unwrap_or_default();
        let user = tunnel.user().map(|u| u.id().to_string());

        let info = ConnectionInfo::new(handler.protocol(), peer.to_string(), target_addr, target_port, user);
        let conn_id = info.id;
        self.stats.add_connection(info).await;

        let (bytes_sent, bytes_received) = tunnel.flow().await;

        self.stats
            .close_connection(conn_id, bytes_sent, bytes_received)
            .await;
        debug!(
            "{:?} connection closed: {} (sent: {}, recv: {})",
            handler.protocol(),
            peer,
            bytes_sent,
            bytes_received
        );
    }

    /// Sample and limit every user's speed once per interval while running.
    async fn check_speed_of_users(self: Arc<Self>) {
        if !self.ctx.config().speed_check.is_on() {
            return;
        }

        let mut shutdown = self.shutdown.subscribe();
        debug!("Speed check started");
        while self.is_running() {
            for user in self.ctx.all_users() {
                user.check_speed();
                user.limit_speed();
            }

            tokio::select! {
                _ = tokio::time::sleep(SPEED_CHECK_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("Speed check stopped");
    }
}

/// Whether a handler failure goes to the log.
fn should_report(err: &Error, debug: Switch) -> bool {
    debug.is_on() && !err.is_completion()
}

/// Count of connection tasks, with a wakeup when it drops to zero.
#[derive(Debug, Default)]
struct InFlight {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

struct InFlightGuard {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            count: Arc::clone(&self.count),
            idle: Arc::clone(&self.idle),
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no connection is in flight; false on timeout.
    async fn wait_idle(&self, limit: Duration) -> bool {
        let drained = async {
            while self.count() > 0 {
                self.idle.notified().await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }
}
