//! Dedicated network I/O thread wrapping a tokio UDP socket
//!
//! Each transport owns one [`IoContext`]. The socket is bound on the caller's
//! thread, then handed to a new OS thread that builds a current-thread tokio
//! runtime and does nothing but wait for datagrams, hand each one to a sink
//! closure and re-arm the receive. The sink runs on the I/O thread, so
//! transports only use it to push into a queue that their owner drains later.
//!
//! Sends are issued from the caller's thread through a clone of the socket.
//! Nothing here enters a runtime on the caller's thread, so a context can be
//! created and used from plain threads and from async code alike.

use crate::error::NetError;
use crate::protocol::MAX_DATAGRAM_SIZE;
use log::{debug, error, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::runtime::Builder;
use tokio::sync::oneshot;

/// Pause after a receive error before re-arming, so a persistent error
/// doesn't spin the I/O thread.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// What the receive loop hands to the sink.
#[derive(Debug)]
pub enum Inbound {
    Datagram { bytes: Vec<u8>, from: SocketAddr },
    ReceiveError(io::Error),
}

/// A bound UDP socket plus the thread that receives on it.
pub struct IoContext {
    sender: StdUdpSocket,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IoContext {
    /// Binds `addr` and starts the receive loop on a thread called `thread_name`.
    ///
    /// Returns once the loop's runtime is up and owns the socket.
    pub fn bind<F>(addr: SocketAddr, thread_name: &str, sink: F) -> Result<Self, NetError>
    where
        F: FnMut(Inbound) + Send + 'static,
    {
        let socket = StdUdpSocket::bind(addr).map_err(|source| NetError::Bind { addr, source })?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        let sender = socket.try_clone()?;

        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<io::Result<()>>();

        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(thread_name.to_string())
                .spawn(move || {
                    let runtime = match Builder::new_current_thread()
                        .enable_io()
                        .enable_time()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    runtime.block_on(async move {
                        let socket = match UdpSocket::from_std(socket) {
                            Ok(socket) => socket,
                            Err(e) => {
                                let _ = ready_tx.send(Err(e));
                                return;
                            }
                        };
                        let _ = ready_tx.send(Ok(()));
                        receive_loop(socket, running, shutdown_rx, sink).await;
                    });
                })
                .map_err(NetError::Runtime)?
        };

        // The thread reports once; a dropped sender means it died before that
        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "I/O thread exited during startup",
            ))
        });
        if let Err(e) = startup {
            running.store(false, Ordering::SeqCst);
            if thread.join().is_err() {
                error!("I/O thread for {} panicked", local_addr);
            }
            return Err(NetError::Runtime(e));
        }

        debug!("I/O context '{}' listening on {}", thread_name, local_addr);

        Ok(Self {
            sender,
            local_addr,
            running,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sends one datagram from the calling thread without blocking.
    ///
    /// A full send buffer surfaces as `WouldBlock`; the datagram is not queued.
    pub fn send_to(&self, bytes: &[u8], target: SocketAddr) -> io::Result<usize> {
        if !self.is_running() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "I/O context is stopped",
            ));
        }

        self.sender.send_to(bytes, target)
    }

    /// Stops the receive loop and joins the I/O thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(shutdown) = self.shutdown.take() {
            // The loop may already be gone; nothing to signal then
            let _ = shutdown.send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("I/O thread for {} panicked", self.local_addr);
            }
        }
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn receive_loop<F>(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
    mut sink: F,
) where
    F: FnMut(Inbound),
{
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            result = socket.recv_from(&mut buffer) => match result {
                Ok((len, from)) => sink(Inbound::Datagram {
                    bytes: buffer[..len].to_vec(),
                    from,
                }),
                Err(e) => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("Error receiving datagram: {}", e);
                    sink(Inbound::ReceiveError(e));
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            },
        }
    }

    debug!("Receive loop stopped");
}

/// Spawns a watcher thread that flips the returned flag on Ctrl+C.
///
/// Meant for binaries whose game loop is a plain thread polling the flag.
pub fn ctrl_c_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let watcher_flag = Arc::clone(&flag);

    let spawned = thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match Builder::new_current_thread().enable_io().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Could not start signal watcher: {}", e);
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                watcher_flag.store(true, Ordering::SeqCst);
            }
        });

    if let Err(e) = spawned {
        error!("Could not spawn signal watcher: {}", e);
    }

    flag
}
