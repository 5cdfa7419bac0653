//! Call table with dialog and endpoint indices
//!
//! Owns the population of live calls. Two lookup paths resolve an inbound
//! packet to its call: the primary index keyed by dialog identifier and a
//! secondary index keyed by announced media (address, port). Idle calls
//! are swept out by [`CallTable::cleanup`], summarized, and pushed onto
//! the mutex-protected handoff queue for the persistence worker.
//!
//! The indices themselves carry no lock: they are owned by the single
//! dispatch path and never shared. Only the handoff queue crosses threads.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cdr::CallRecord;
use crate::error::CallError;

use super::call::Call;

/// Shared handle to the finalized-call handoff queue.
pub type HandoffQueue = Arc<Mutex<VecDeque<CallRecord>>>;

/// Table statistics
#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub created: u64,
    pub evicted: u64,
    pub rejected: u64,
}

/// Registry of live calls.
pub struct CallTable {
    /// Primary index: dialog identifier -> call (exclusive ownership)
    calls: HashMap<String, Call>,
    /// Secondary index: announced media endpoint -> dialog identifier
    by_endpoint: HashMap<(Ipv4Addr, u16), String>,
    /// Finalized calls awaiting the persistence worker
    queue: HandoffQueue,
    /// Longest dialog identifier the table will store
    max_call_id_len: usize,
    /// Seconds of silence before a call is considered dead
    idle_timeout: u64,
    pub stats: TableStats,
}

impl CallTable {
    pub fn new(max_call_id_len: usize, idle_timeout: u64) -> Self {
        Self {
            calls: HashMap::new(),
            by_endpoint: HashMap::new(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_call_id_len,
            idle_timeout,
            stats: TableStats::default(),
        }
    }

    /// Clone of the handoff queue handle, for the persistence worker.
    pub fn queue(&self) -> HandoffQueue {
        Arc::clone(&self.queue)
    }

    /// Create a new call for `call_id`. Refuses identifiers longer than
    /// the configured maximum; it never truncates.
    pub fn add(&mut self, call_id: &str, ts: u64) -> Result<&mut Call, CallError> {
        if call_id.len() > self.max_call_id_len {
            self.stats.rejected += 1;
            return Err(CallError::IdentifierTooLong {
                len: call_id.len(),
                max: self.max_call_id_len,
            });
        }
        self.stats.created += 1;
        Ok(self
            .calls
            .entry(call_id.to_string())
            .or_insert_with(|| Call::new(call_id.to_string(), ts)))
    }

    /// Primary-index lookup by dialog identifier.
    pub fn find_by_call_id(&mut self, call_id: &str) -> Option<&mut Call> {
        self.calls.get_mut(call_id)
    }

    /// Read-only lookup, for inspection and reporting.
    pub fn get(&self, call_id: &str) -> Option<&Call> {
        self.calls.get(call_id)
    }

    /// Secondary-index lookup by announced media endpoint.
    pub fn find_by_ip_port(&mut self, addr: Ipv4Addr, port: u16) -> Option<&mut Call> {
        let id = self.by_endpoint.get(&(addr, port))?;
        self.calls.get_mut(id.as_str())
    }

    /// Register a media endpoint on a call and publish it into the
    /// secondary index. Duplicate and capacity signals come back from the
    /// call itself; the index is only touched on success.
    pub fn register_endpoint(
        &mut self,
        call_id: &str,
        addr: Ipv4Addr,
        port: u16,
        user_agent: String,
    ) -> Result<(), CallError> {
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or(CallError::FieldNotFound("call"))?;
        call.add_endpoint(addr, port, user_agent)?;
        self.by_endpoint.insert((addr, port), call_id.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Evict calls whose last packet is older than `now` by more than the
    /// idle timeout. Each evicted call leaves both indices, its archive
    /// handle is closed, and its summary lands on the handoff queue
    /// exactly once. Returns the number of evictions.
    pub fn cleanup(&mut self, now: u64) -> usize {
        let stale: Vec<String> = self
            .calls
            .iter()
            .filter(|(_, call)| now.saturating_sub(call.last_packet) > self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let count = stale.len();
        for id in stale {
            self.evict(&id);
        }
        count
    }

    /// Evict every remaining call, regardless of age. Used at shutdown.
    pub fn drain_all(&mut self) -> usize {
        let ids: Vec<String> = self.calls.keys().cloned().collect();
        let count = ids.len();
        for id in ids {
            self.evict(&id);
        }
        count
    }

    fn evict(&mut self, call_id: &str) {
        let Some(mut call) = self.calls.remove(call_id) else {
            return;
        };
        for endpoint in call.endpoints() {
            let key = (endpoint.addr, endpoint.port);
            // another call may have announced the same endpoint since
            if self.by_endpoint.get(&key).map(String::as_str) == Some(call_id) {
                self.by_endpoint.remove(&key);
            }
        }
        // close the archive before the summary leaves the dispatch thread
        call.archive = None;

        debug!(
            call_id,
            duration = call.duration(),
            answered = call.answered(),
            "call evicted"
        );
        self.stats.evicted += 1;
        self.queue.lock().push_back(CallRecord::from_call(&call));
    }
}
