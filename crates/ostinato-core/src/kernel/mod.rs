//! Kernel request bus - the real-time path's only door to blocking work
//!
//! The audio thread may not touch the filesystem or take locks, but users
//! still ask it to do things that need both (persist a loop, rewrite the
//! config). Those become [`KernelRequest`]s: small, fixed-size, `Copy`
//! records pushed over a lock-free ring to a shell thread that does the
//! blocking work and posts a completion back. The audio thread keeps a
//! pooled ledger entry per in-flight request so completions can be matched
//! up blocks later.
//!
//! Producer and consumer agree only on the request type and argument
//! layout; everything else about the shell side is opaque to the engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::config::{save_config, LooperConfig};
use crate::pool::{Arena, ArenaStats, Handle, PoolReset};
use crate::trace::{TraceContext, TraceSender};
use crate::types::Frame;

/// In-flight requests the ring (and the ledger arena) can hold
pub const KERNEL_QUEUE_CAPACITY: usize = 64;

/// Inline capacity of one request argument
pub const ARG_CAPACITY: usize = 64;

/// A small fixed-capacity string that crosses the ring by value
///
/// No heap, `Copy`, truncating on overflow. Long enough for a file stem or
/// a loop label; full paths are resolved on the shell side.
#[derive(Clone, Copy)]
pub struct ArgStr {
    bytes: [u8; ARG_CAPACITY],
    len: u8,
}

impl ArgStr {
    pub const fn empty() -> Self {
        Self {
            bytes: [0; ARG_CAPACITY],
            len: 0,
        }
    }

    /// Copy from a string slice, truncating at a char boundary if needed
    pub fn from_str(s: &str) -> Self {
        let mut arg = Self::empty();
        let mut end = s.len().min(ARG_CAPACITY);
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        arg.bytes[..end].copy_from_slice(&s.as_bytes()[..end]);
        arg.len = end as u8;
        arg
    }

    pub fn as_str(&self) -> &str {
        // Construction only ever copies in valid UTF-8 ending on a boundary
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ArgStr {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ArgStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for ArgStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// What the shell thread is being asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelRequestType {
    /// Ledger placeholder, never sent
    #[default]
    None,
    /// Persist the named loop's state (args: session name, loop label)
    SaveLoop,
    /// Rewrite the engine configuration file (arg: config path)
    SaveConfig,
    /// Surface a message to the user outside the trace stream
    Alert,
}

/// A deferred-action request crossing from the real-time path
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KernelRequest {
    /// Matches the completion back to the ledger entry
    pub request_id: u64,
    pub request_type: KernelRequestType,
    pub args: [ArgStr; 3],
    /// Originating track, u8::MAX when engine-global
    pub track: u8,
}

/// The shell thread's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCompletion {
    pub request_id: u64,
    /// 0 = success; anything else is request-type specific
    pub return_code: i32,
}

/// Ledger entry for a request awaiting completion
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelEvent {
    pub request: KernelRequest,
    /// Stream frame the request was issued at
    pub issued_frame: Frame,
}

impl PoolReset for KernelEvent {
    fn pool_reset(&mut self) {
        *self = Self::default();
    }
}

/// Real-time side of the bus
pub struct KernelClient {
    request_tx: rtrb::Producer<KernelRequest>,
    completion_rx: rtrb::Consumer<KernelCompletion>,
    /// In-flight ledger; entries released when the completion arrives
    pending: Arena<KernelEvent>,
    next_id: u64,
    trace: Option<TraceSender>,
}

/// Shell-thread side of the bus
pub struct KernelShell {
    request_rx: rtrb::Consumer<KernelRequest>,
    completion_tx: rtrb::Producer<KernelCompletion>,
}

/// Create a connected client/shell pair
pub fn kernel_channel(capacity: usize) -> (KernelClient, KernelShell) {
    let (request_tx, request_rx) = rtrb::RingBuffer::new(capacity);
    let (completion_tx, completion_rx) = rtrb::RingBuffer::new(capacity);
    (
        KernelClient {
            request_tx,
            completion_rx,
            pending: Arena::new("kernel", capacity),
            next_id: 1,
            trace: None,
        },
        KernelShell {
            request_rx,
            completion_tx,
        },
    )
}

impl KernelClient {
    pub fn set_trace(&mut self, trace: TraceSender) {
        self.pending.set_trace(trace.clone());
        self.trace = Some(trace);
    }

    /// Submit a request; returns its id, or `None` when the ring is full
    ///
    /// A full ring means the shell thread has fallen far behind; the
    /// request is dropped with a warning rather than blocking the block.
    pub fn submit(
        &mut self,
        request_type: KernelRequestType,
        args: [ArgStr; 3],
        track: Option<usize>,
        issued_frame: Frame,
    ) -> Option<u64> {
        let request = KernelRequest {
            request_id: self.next_id,
            request_type,
            args,
            track: track.map(|t| t as u8).unwrap_or(u8::MAX),
        };
        let handle = self.pending.alloc();
        if let Some(entry) = self.pending.get_mut(handle) {
            entry.request = request;
            entry.issued_frame = issued_frame;
        }
        match self.request_tx.push(request) {
            Ok(()) => {
                self.next_id += 1;
                Some(request.request_id)
            }
            Err(rtrb::PushError::Full(_)) => {
                self.pending.release(handle);
                if let Some(trace) = &self.trace {
                    trace.warn(
                        TraceContext::global(),
                        "kernel request ring full, request dropped",
                        request_type as i64,
                        0,
                    );
                }
                None
            }
        }
    }

    /// Drain completions posted by the shell, releasing their ledger entries
    ///
    /// Calls `on_complete` with the original request and its return code.
    pub fn drain_completions(&mut self, mut on_complete: impl FnMut(&KernelEvent, i32)) -> usize {
        let mut drained = 0;
        while let Ok(completion) = self.completion_rx.pop() {
            let entry = self
                .pending
                .iter()
                .find(|(_, e)| e.request.request_id == completion.request_id);
            match entry {
                Some((handle, event)) => {
                    let event = *event;
                    on_complete(&event, completion.return_code);
                    self.pending.release(handle);
                }
                None => {
                    if let Some(trace) = &self.trace {
                        trace.warn(
                            TraceContext::global(),
                            "completion for unknown kernel request",
                            completion.request_id as i64,
                            completion.return_code as i64,
                        );
                    }
                }
            }
            drained += 1;
        }
        drained
    }

    /// Requests still awaiting completion
    pub fn in_flight(&self) -> usize {
        self.pending.stats().in_use
    }

    /// Ledger arena counters
    pub fn stats(&self) -> ArenaStats {
        self.pending.stats()
    }
}

impl KernelShell {
    /// Pop one request if available
    pub fn pop(&mut self) -> Option<KernelRequest> {
        self.request_rx.pop().ok()
    }

    /// Post a completion; drops it if the RT side has stopped draining
    pub fn complete(&mut self, request_id: u64, return_code: i32) {
        let _ = self.completion_tx.push(KernelCompletion {
            request_id,
            return_code,
        });
    }
}

/// Record written by the default `SaveLoop` handler
#[derive(Debug, Serialize)]
struct SavedLoopNote<'a> {
    session: &'a str,
    label: &'a str,
    saved_at: String,
}

/// Handle one request with real filesystem work
///
/// This is the stock shell handler; embedders with their own persistence
/// substitute their own in [`spawn_shell_thread`]. `config` is the
/// snapshot `SaveConfig` writes out; the shell thread owns it, so runtime
/// per-track tweaks made through commands are not reflected.
pub fn default_handler(
    base_dir: &std::path::Path,
    config: &LooperConfig,
    request: &KernelRequest,
) -> anyhow::Result<i32> {
    match request.request_type {
        KernelRequestType::None => Ok(0),
        KernelRequestType::SaveLoop => {
            let session = request.args[0].as_str();
            let label = request.args[1].as_str();
            let note = SavedLoopNote {
                session,
                label,
                saved_at: chrono::Local::now().to_rfc3339(),
            };
            let mut path = PathBuf::from(base_dir);
            path.push(session);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("creating session dir {}", path.display()))?;
            path.push(format!("{label}.yaml"));
            let yaml = serde_yaml::to_string(&note).context("serializing loop note")?;
            std::fs::write(&path, yaml)
                .with_context(|| format!("writing loop note {}", path.display()))?;
            Ok(0)
        }
        KernelRequestType::SaveConfig => {
            let name = request.args[0].as_str();
            let name = if name.is_empty() {
                crate::config::CONFIG_FILE_NAME
            } else {
                name
            };
            save_config(config, &base_dir.join(name))?;
            Ok(0)
        }
        KernelRequestType::Alert => {
            log::warn!("engine alert: {}", request.args[0].as_str());
            Ok(0)
        }
    }
}

/// Spawn the shell thread
///
/// Drains requests, runs `handler` for each, posts completions, and exits
/// when `shutdown` is set. Handler failures become a nonzero return code
/// plus a log entry; the thread itself never dies on one.
pub fn spawn_shell_thread(
    mut shell: KernelShell,
    shutdown: Arc<AtomicBool>,
    mut handler: impl FnMut(&KernelRequest) -> anyhow::Result<i32> + Send + 'static,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("ostinato-kernel".to_string())
        .spawn(move || {
            log::info!("kernel shell thread started");
            while !shutdown.load(Ordering::Relaxed) {
                let mut idle = true;
                while let Some(request) = shell.pop() {
                    idle = false;
                    let code = match handler(&request) {
                        Ok(code) => code,
                        Err(err) => {
                            log::error!(
                                "kernel request {:?} failed: {err:#}",
                                request.request_type
                            );
                            -1
                        }
                    };
                    shell.complete(request.request_id, code);
                }
                if idle {
                    thread::sleep(Duration::from_millis(10));
                }
            }
            log::info!("kernel shell thread stopped");
        })
}
