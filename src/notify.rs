//! List-changed notification fan-out.
//!
//! After a sync pass reports changed kinds, every live session gets that
//! kind's list-changed notification on its outbound queue. One session's
//! failure (a closed or saturated queue) is logged and never stops the
//! fan-out to the remaining sessions.

use serde_json::json;
use tracing::{debug, warn};

use crate::protocol::CapabilityKind;
use crate::session::SessionTable;

/// Notify every live session that the given kinds' catalogs changed.
///
/// Skips all work when no client session exists. Kinds that share a
/// notification method (resources and resource templates) produce a
/// single notification.
pub fn broadcast_list_changed(sessions: &SessionTable, kinds: &[CapabilityKind]) {
    if sessions.is_empty() {
        debug!(kinds = kinds.len(), "no live sessions; skipping fan-out");
        return;
    }

    let mut methods: Vec<&'static str> =
        kinds.iter().map(|kind| kind.list_changed_method()).collect();
    methods.sort_unstable();
    methods.dedup();

    for method in methods {
        let payload = json!({ "jsonrpc": "2.0", "method": method }).to_string();
        let mut delivered = 0usize;

        for session in sessions.snapshot() {
            match session.try_notify(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(
                        session_id = %session.id,
                        method = method,
                        "failed to queue notification"
                    );
                }
            }
        }

        debug!(method = method, delivered = delivered, "list-changed fan-out");
    }
}
