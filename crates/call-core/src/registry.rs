//! The call registry: thread-safe ownership of every live call, with
//! deferred physical deletion.
//!
//! Clearing a call is split into two phases. Marking moves the call out of
//! the live map into a pending-removal list, so later lookups miss it and
//! in-flight iterators stay valid; physical destruction happens only on
//! the garbage collector's context, once nothing else holds a reference to
//! the slot. That turns a multi-writer deletion race into a single-writer
//! deletion.
//!
//! Lookups come in three modes, mirroring how much of the call a caller
//! may touch:
//!
//! - read-only: shared access, no structural mutation;
//! - read-write: exclusive access to that one call, other calls unaffected;
//! - reference: a bare handle, used to clear a call without waiting on
//!   whoever currently holds it.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::{Notify, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, trace};

use crate::call::Call;
use crate::types::{CallEndReason, CallToken};

/// A registry slot: the call plus its access-mode lock.
///
/// The lock guards *access*, not data; the call's own fields carry their
/// own interior locks. Holding a slot `Arc` (or a guard, which embeds one)
/// keeps the call alive: the collector only destroys slots nobody else
/// references.
pub struct CallSlot {
    call: Call,
    access: Arc<RwLock<()>>,
}

impl CallSlot {
    fn new(call: Call) -> Arc<Self> {
        Arc::new(Self {
            call,
            access: Arc::new(RwLock::new(())),
        })
    }
}

impl Deref for CallSlot {
    type Target = Call;

    fn deref(&self) -> &Call {
        &self.call
    }
}

/// Shared-access guard returned by read-only lookups.
pub struct CallReadGuard {
    slot: Arc<CallSlot>,
    _access: OwnedRwLockReadGuard<()>,
}

impl Deref for CallReadGuard {
    type Target = Call;

    fn deref(&self) -> &Call {
        &self.slot.call
    }
}

/// Exclusive-access guard returned by read-write lookups.
pub struct CallWriteGuard {
    slot: Arc<CallSlot>,
    _access: OwnedRwLockWriteGuard<()>,
}

impl Deref for CallWriteGuard {
    type Target = Call;

    fn deref(&self) -> &Call {
        &self.slot.call
    }
}

/// Summary of a call at the moment it was marked cleared.
#[derive(Debug, Clone)]
pub struct ClearedCall {
    pub token: CallToken,
    pub party_a: String,
    pub party_b: String,
    pub reason: CallEndReason,
}

struct PendingCall {
    slot: Arc<CallSlot>,
    sync: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryStats {
    pub total_created: u64,
    pub total_destroyed: u64,
}

/// Thread-safe mapping from call token to call, plus the pending-removal
/// set drained by the garbage collector.
pub struct CallRegistry {
    calls: RwLock<HashMap<CallToken, Arc<CallSlot>>>,
    pending: Mutex<Vec<PendingCall>>,
    next_token: AtomicU64,
    stats: Mutex<RegistryStats>,
    all_cleared: Notify,
    clearing_all: AtomicBool,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            stats: Mutex::new(RegistryStats::default()),
            all_cleared: Notify::new(),
            clearing_all: AtomicBool::new(false),
        }
    }

    /// Allocate a token and insert a new call.
    pub async fn create_call(&self, party_a: &str, party_b: &str) -> (CallToken, Arc<CallSlot>) {
        let token = CallToken(self.next_token.fetch_add(1, Ordering::Relaxed).to_string());
        let slot = CallSlot::new(Call::new(token.clone(), party_a, party_b));
        self.calls.write().await.insert(token.clone(), slot.clone());
        self.stats.lock().total_created += 1;
        debug!("created call {}", token);
        (token, slot)
    }

    /// Shared-access lookup. Misses once the call is marked cleared.
    pub async fn find_read_only(&self, token: &CallToken) -> Option<CallReadGuard> {
        let slot = self.calls.read().await.get(token).cloned()?;
        let access = slot.access.clone().read_owned().await;
        Some(CallReadGuard {
            slot,
            _access: access,
        })
    }

    /// Exclusive-access lookup. Misses once the call is marked cleared.
    pub async fn find_read_write(&self, token: &CallToken) -> Option<CallWriteGuard> {
        let slot = self.calls.read().await.get(token).cloned()?;
        let access = slot.access.clone().write_owned().await;
        Some(CallWriteGuard {
            slot,
            _access: access,
        })
    }

    /// Bare lookup that takes no access lock. Misses once the call is
    /// marked cleared.
    pub async fn find_reference(&self, token: &CallToken) -> Option<Arc<CallSlot>> {
        self.calls.read().await.get(token).cloned()
    }

    /// Mark a call cleared: set its end reason and move it to the
    /// pending-removal list. Returns `None` when the token is unknown or
    /// the call was already cleared; concurrent clears on the same token
    /// are idempotent, only the first produces a transition.
    ///
    /// `sync` is fired when the collector physically destroys the call.
    pub async fn clear_call(
        &self,
        token: &CallToken,
        reason: CallEndReason,
        sync: Option<oneshot::Sender<()>>,
    ) -> Option<ClearedCall> {
        let slot = self.calls.write().await.remove(token)?;
        slot.call.set_end_reason_once(reason);
        let cleared = ClearedCall {
            token: token.clone(),
            party_a: slot.call.party_a().to_string(),
            party_b: slot.call.party_b(),
            reason: slot.call.end_reason().unwrap_or(reason),
        };
        self.pending.lock().push(PendingCall { slot, sync });
        Some(cleared)
    }

    /// Mark every live call cleared, in no particular order.
    pub async fn clear_all(&self, reason: CallEndReason) -> Vec<ClearedCall> {
        let tokens: Vec<CallToken> = self.calls.read().await.keys().cloned().collect();
        let mut cleared = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(c) = self.clear_call(&token, reason, None).await {
                cleared.push(c);
            }
        }
        cleared
    }

    /// Block until a collector pass reports everything drained.
    ///
    /// The caller must not hold any call guard or slot reference while
    /// waiting, or the drain can never complete.
    pub async fn wait_all_cleared(&self) {
        let notified = self.all_cleared.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        self.clearing_all.store(true, Ordering::SeqCst);
        notified.await;
        self.clearing_all.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_clearing_all(&self) -> bool {
        self.clearing_all.load(Ordering::SeqCst)
    }

    pub(crate) fn notify_all_cleared(&self) {
        self.all_cleared.notify_waiters();
    }

    /// Physically destroy pending calls that nothing references anymore.
    /// Collector-only. Returns `true` when the pending set fully drained.
    pub(crate) fn purge(&self) -> bool {
        let ready: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            let mut kept = Vec::new();
            let mut ready = Vec::new();
            for p in pending.drain(..) {
                // One strong count means only the pending list holds it.
                if Arc::strong_count(&p.slot) == 1 {
                    ready.push(p);
                } else {
                    kept.push(p);
                }
            }
            *pending = kept;
            ready
        };

        let drained = self.pending.lock().is_empty();

        for p in ready {
            trace!("destroying call {}", p.slot.call.token());
            self.stats.lock().total_destroyed += 1;
            if let Some(tx) = p.sync {
                let _ = tx.send(());
            }
        }

        drained
    }

    /// Tokens of every live (not yet cleared) call.
    pub async fn tokens(&self) -> Vec<CallToken> {
        self.calls.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        *self.stats.lock()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}
