//! Notifier Adapter: single-slot "main message" delete-and-resend per user,
//! plus out-of-band notifications for latch-backed events (deposit received,
//! deadline expired, payout complete). Delivery is queue-backed — see
//! `worker`/`sender`, adapted from the teacher's `webhooks::{worker,sender}` —
//! so a send failure degrades to "logged, not retried to death" rather than
//! blocking the caller.

pub mod sender;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::error::StoreResult;
use crate::db::notifications;

const MAX_NAV_STACK: usize = 20;

/// One (text, keyboard) screen in a user's navigation history.
#[derive(Debug, Clone)]
pub struct Screen {
    pub text: String,
    pub keyboard: Vec<String>,
}

/// Tracks each user's current main-message id and a bounded back-stack.
/// Best-effort and in-memory: the durable dedup guarantee lives in the Deal
/// latches (`deposit_notification_sent`, `deadline_notification_sent`), not here.
#[derive(Default)]
pub struct NavigationState {
    stacks: Mutex<HashMap<String, Vec<Screen>>>,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, user_id: &str, screen: Screen) {
        let mut stacks = self.stacks.lock().expect("navigation state mutex poisoned");
        let stack = stacks.entry(user_id.to_string()).or_default();
        stack.push(screen);
        if stack.len() > MAX_NAV_STACK {
            stack.remove(0);
        }
    }

    /// Pops the current screen and returns the one beneath it, if any.
    pub fn back(&self, user_id: &str) -> Option<Screen> {
        let mut stacks = self.stacks.lock().expect("navigation state mutex poisoned");
        let stack = stacks.get_mut(user_id)?;
        stack.pop();
        stack.last().cloned()
    }
}

/// The delivery surface the core calls into. A real implementation talks to
/// a chat platform; here it enqueues a signed HTTP notification per spec.md
/// §6's `sendMain`/`sendNotification`/`deleteUserMessage` contract.
pub trait Notifier {
    /// Deletes the previous main message (if any) and sends a new one.
    fn send_main(&self, conn: &Connection, user_id: &str, text: &str) -> StoreResult<i64>;

    /// Sends an out-of-band notification alongside the main message.
    fn send_notification(&self, conn: &Connection, deal_id: Option<Uuid>, user_id: &str, notice_type: &str, text: &str) -> StoreResult<i64>;
}

/// Owns its collaborators (rather than borrowing) so it can be wrapped in an
/// `Arc` and shared with the `'static` background monitors.
pub struct QueuedNotifier {
    pub target_url_for_user: Arc<dyn Fn(&str) -> String + Send + Sync>,
    pub nav: Arc<NavigationState>,
}

impl Notifier for QueuedNotifier {
    fn send_main(&self, conn: &Connection, user_id: &str, text: &str) -> StoreResult<i64> {
        self.nav.push(user_id, Screen { text: text.to_string(), keyboard: Vec::new() });
        let payload = serde_json::json!({ "kind": "main", "text": text }).to_string();
        notifications::enqueue(conn, None, "main_message", &payload, &(self.target_url_for_user)(user_id))
    }

    fn send_notification(&self, conn: &Connection, deal_id: Option<Uuid>, user_id: &str, notice_type: &str, text: &str) -> StoreResult<i64> {
        let payload = serde_json::json!({ "kind": "notification", "notice_type": notice_type, "text": text }).to_string();
        notifications::enqueue(conn, deal_id, notice_type, &payload, &(self.target_url_for_user)(user_id))
    }
}
