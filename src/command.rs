// Write side of the link: trailing-edge debounce of slider input into
// rate-limited command strings
//
// Each (param, channel) key owns at most one pending value and one timer task.
// A newer request replaces the value and restarts the timer, so only the last
// value after a quiet period reaches the wire. All writes go through a single
// `CommandWriter`, so two commands never interleave on the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::config::{LinkConfig, ParamRanges};
use crate::messages::{ChannelId, CommandRequest, ParamEvent, ParamId};
use crate::transport::{TransportError, TransportWrite};

/// Serializes outbound commands onto the transport
pub struct CommandWriter {
    sink: Mutex<Option<Box<dyn TransportWrite>>>,
    sealed: AtomicBool,
}

impl CommandWriter {
    pub fn new(sink: Box<dyn TransportWrite>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            sealed: AtomicBool::new(false),
        }
    }

    /// Write one command. Fails with `Closed` once the writer is sealed.
    pub fn send(&self, command: &CommandRequest) -> Result<(), TransportError> {
        let mut sink = lock(&self.sink);
        if self.sealed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match sink.as_mut() {
            Some(sink) => sink.write_line(&command.to_command_string()),
            None => Err(TransportError::Closed),
        }
    }

    /// Refuse all further sends. A send already holding the lock completes.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Seal and hand back the transport so it can be dropped
    pub fn release(&self) -> Option<Box<dyn TransportWrite>> {
        self.seal();
        lock(&self.sink).take()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }
}

/// Debounce key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub param: ParamId,
    pub channel: ChannelId,
}

struct Pending {
    value: f64,
    due: Instant,
    ticket: u64,
    timer: JoinHandle<()>,
}

struct Shared {
    ranges: ParamRanges,
    delay: Duration,
    writer: Arc<CommandWriter>,
    faults: UnboundedSender<TransportError>,
    pending: Mutex<HashMap<CommandKey, Pending>>,
    next_ticket: AtomicU64,
    closed: AtomicBool,
    sent: AtomicU64,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    shared: Arc<Shared>,
}

impl CommandDispatcher {
    /// `faults` receives write failures; they end the session.
    pub fn new(
        config: &LinkConfig,
        writer: Arc<CommandWriter>,
        faults: UnboundedSender<TransportError>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ranges: config.ranges,
                delay: config.send_delay(),
                writer,
                faults,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                sent: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule `event` for sending after the debounce delay, replacing any
    /// value still pending for the same key. Must be called inside a tokio
    /// runtime. Returns the scheduled request, or `None` after shutdown.
    pub fn request(&self, event: ParamEvent) -> Option<CommandRequest> {
        let shared = &self.shared;
        let key = CommandKey {
            param: event.param,
            channel: event.channel,
        };
        let value = shared.ranges.get(event.param).scale(event.raw);
        let due = Instant::now() + shared.delay;
        let ticket = shared.next_ticket.fetch_add(1, Ordering::Relaxed);

        let mut pending = lock(&shared.pending);
        if shared.closed.load(Ordering::SeqCst) {
            warn!("Ignoring {}{} request after shutdown", key.param, key.channel);
            return None;
        }

        if let Some(previous) = pending.remove(&key) {
            previous.timer.abort();
            debug!(
                "Superseded {}{}={:.4}",
                key.param, key.channel, previous.value
            );
        }

        let task_shared = Arc::clone(shared);
        let timer = tokio::spawn(async move {
            sleep_until(due).await;
            let Some(request) = task_shared.take_due(key, ticket) else {
                return;
            };
            // Serial writes block; keep them off the runtime threads
            let _ = tokio::task::spawn_blocking(move || task_shared.write(&request)).await;
        });
        pending.insert(
            key,
            Pending {
                value,
                due,
                ticket,
                timer,
            },
        );

        Some(CommandRequest {
            param: key.param,
            channel: key.channel,
            value,
            due: due.into_std(),
        })
    }

    /// Value waiting for its timer, if any
    pub fn pending_value(&self, param: ParamId, channel: ChannelId) -> Option<f64> {
        lock(&self.shared.pending)
            .get(&CommandKey { param, channel })
            .map(|p| p.value)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Commands written so far
    pub fn sent_count(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// Stop accepting requests and drop every pending value without sending it.
    /// Returns how many were discarded.
    pub fn cancel_all(&self) -> usize {
        let mut pending = lock(&self.shared.pending);
        self.shared.closed.store(true, Ordering::SeqCst);
        let count = pending.len();
        for (_, p) in pending.drain() {
            p.timer.abort();
        }
        if count > 0 {
            info!("Cancelled {} pending command(s)", count);
        }
        count
    }
}

impl Shared {
    /// Claim the pending value for `key` if this timer still owns it
    fn take_due(&self, key: CommandKey, ticket: u64) -> Option<CommandRequest> {
        let mut pending = lock(&self.pending);
        // Superseded or cancelled while this timer was waking up
        if self.closed.load(Ordering::SeqCst)
            || pending.get(&key).map(|p| p.ticket) != Some(ticket)
        {
            return None;
        }
        let p = pending.remove(&key)?;
        Some(CommandRequest {
            param: key.param,
            channel: key.channel,
            value: p.value,
            due: p.due.into_std(),
        })
    }

    fn write(&self, request: &CommandRequest) {
        match self.writer.send(request) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!("Sent {}", request);
            }
            Err(TransportError::Closed) => debug!("Dropped {} after shutdown", request),
            Err(e) => {
                error!("Failed to send {}: {}", request, e);
                let _ = self.faults.send(e);
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
