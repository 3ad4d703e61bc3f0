//! Fire-once callbacks keyed by approval id.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agentguard_primitives::ApprovalId;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{WebhookError, WebhookResult};

type Callback = Box<dyn FnOnce(Value) + Send + 'static>;

struct Entry {
    token: u64,
    callback: Callback,
}

#[derive(Default)]
struct Slots {
    next_token: u64,
    entries: HashMap<ApprovalId, Entry>,
}

impl Slots {
    fn insert(&mut self, approval_id: ApprovalId, callback: Callback) -> u64 {
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        self.entries.insert(approval_id, Entry { token, callback });
        token
    }
}

/// Result of delivering a payload to the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A callback was registered and has been invoked.
    Delivered,
    /// Nobody was waiting on the approval; the payload was dropped.
    NoWaiter,
}

/// Outcome of [`CallbackRegistry::wait_for_approval`].
#[derive(Clone, Debug, PartialEq)]
pub enum ApprovalWait {
    /// The webhook payload delivered for the approval.
    Notified(Value),
    /// The wait ended without a delivery.
    TimedOut,
}

impl ApprovalWait {
    /// Returns the delivered payload, if any.
    #[must_use]
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Notified(payload) => Some(payload),
            Self::TimedOut => None,
        }
    }
}

/// Shared map of pending approval callbacks.
///
/// Each callback fires at most once: delivery removes it under the lock before
/// invoking it, so concurrent deliveries and timeouts cannot both see it.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().expect("callback registry poisoned")
    }

    /// Registers a callback for an approval.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::AlreadyRegistered`] if a callback is already
    /// pending for the approval; the existing callback is kept.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    pub fn register<F>(&self, approval_id: ApprovalId, callback: F) -> WebhookResult<()>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.register_entry(approval_id, Box::new(callback)).map(|_| ())
    }

    fn register_entry(&self, approval_id: ApprovalId, callback: Callback) -> WebhookResult<u64> {
        let mut slots = self.lock();
        if slots.entries.contains_key(&approval_id) {
            return Err(WebhookError::AlreadyRegistered { approval_id });
        }
        debug!(approval_id = %approval_id, "approval callback registered");
        Ok(slots.insert(approval_id, callback))
    }

    /// Registers a callback, replacing any pending one for the same approval.
    ///
    /// Returns `true` when an earlier callback was discarded.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    pub fn register_replacing<F>(&self, approval_id: ApprovalId, callback: F) -> bool
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let mut slots = self.lock();
        let replaced = slots.entries.contains_key(&approval_id);
        if replaced {
            warn!(approval_id = %approval_id, "replacing pending approval callback");
        }
        slots.insert(approval_id, Box::new(callback));
        replaced
    }

    /// Removes the pending callback for an approval without invoking it.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    pub fn unregister(&self, approval_id: &ApprovalId) -> bool {
        self.lock().entries.remove(approval_id).is_some()
    }

    fn unregister_token(&self, approval_id: &ApprovalId, token: u64) -> bool {
        let mut slots = self.lock();
        match slots.entries.get(approval_id) {
            Some(entry) if entry.token == token => {
                slots.entries.remove(approval_id);
                true
            }
            _ => false,
        }
    }

    /// Delivers a payload to the approval's callback, if one is pending.
    ///
    /// The callback runs on the calling task after the lock is released. A
    /// panicking callback is logged and swallowed; it is not re-armed.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    pub fn dispatch(&self, approval_id: &ApprovalId, payload: Value) -> DispatchOutcome {
        let Some(entry) = self.lock().entries.remove(approval_id) else {
            debug!(approval_id = %approval_id, "no waiter for approval delivery");
            return DispatchOutcome::NoWaiter;
        };

        let callback = entry.callback;
        if catch_unwind(AssertUnwindSafe(move || callback(payload))).is_err() {
            error!(approval_id = %approval_id, "approval callback panicked");
        }
        DispatchOutcome::Delivered
    }

    /// Returns `true` when a callback is pending for the approval.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn contains(&self, approval_id: &ApprovalId) -> bool {
        self.lock().entries.contains_key(approval_id)
    }

    /// Returns the number of pending callbacks.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` when nothing is pending.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Waits for the webhook delivery of an approval, up to `timeout`.
    ///
    /// On timeout the pending callback is removed. If a delivery claimed it
    /// first, its payload is returned instead, so a payload is never lost and
    /// never delivered twice. Dropping the returned future also removes the
    /// callback.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::AlreadyRegistered`] if another waiter already
    /// holds the approval.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    pub async fn wait_for_approval(
        &self,
        approval_id: ApprovalId,
        timeout: Duration,
    ) -> WebhookResult<ApprovalWait> {
        let (tx, mut rx) = oneshot::channel();
        let token = self.register_entry(
            approval_id.clone(),
            Box::new(move |payload| {
                let _ = tx.send(payload);
            }),
        )?;
        let mut guard = WaitGuard {
            registry: self,
            approval_id: &approval_id,
            token,
            armed: true,
        };

        let waited = tokio::time::timeout(timeout, &mut rx).await;
        let outcome = match waited {
            Ok(Ok(payload)) => ApprovalWait::Notified(payload),
            Ok(Err(_)) => ApprovalWait::TimedOut,
            Err(_) => self.settle_expired(&approval_id, token, rx, timeout).await,
        };
        guard.armed = false;
        Ok(outcome)
    }

    async fn settle_expired(
        &self,
        approval_id: &ApprovalId,
        token: u64,
        rx: oneshot::Receiver<Value>,
        timeout: Duration,
    ) -> ApprovalWait {
        if self.unregister_token(approval_id, token) {
            debug!(approval_id = %approval_id, ?timeout, "approval wait timed out");
            return ApprovalWait::TimedOut;
        }
        // A delivery already claimed the callback; its send is imminent.
        match rx.await {
            Ok(payload) => ApprovalWait::Notified(payload),
            Err(_) => ApprovalWait::TimedOut,
        }
    }
}

struct WaitGuard<'a> {
    registry: &'a CallbackRegistry,
    approval_id: &'a ApprovalId,
    token: u64,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.unregister_token(self.approval_id, self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn id(raw: &str) -> ApprovalId {
        ApprovalId::new(raw).unwrap()
    }

    #[test]
    fn dispatch_fires_once() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(id("apr-1"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(
            registry.dispatch(&id("apr-1"), json!({"status": "APPROVED"})),
            DispatchOutcome::Delivered
        );
        assert_eq!(
            registry.dispatch(&id("apr-1"), json!({"status": "APPROVED"})),
            DispatchOutcome::NoWaiter
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_keeps_first_waiter() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        registry
            .register(id("apr-1"), move |_| first.lock().unwrap().push("first"))
            .unwrap();

        let err = registry
            .register(id("apr-1"), |_| panic!("second callback must not run"))
            .unwrap_err();
        assert!(matches!(err, WebhookError::AlreadyRegistered { .. }));

        registry.dispatch(&id("apr-1"), json!({}));
        assert_eq!(*seen.lock().unwrap(), ["first"]);
    }

    #[test]
    fn register_replacing_is_last_writer_wins() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        assert!(!registry.register_replacing(id("apr-1"), move |_| {
            first.lock().unwrap().push("first");
        }));
        assert!(registry.register_replacing(id("apr-1"), move |_| {
            second.lock().unwrap().push("second");
        }));

        registry.dispatch(&id("apr-1"), json!({}));
        assert_eq!(*seen.lock().unwrap(), ["second"]);
    }

    #[test]
    fn panicking_callback_is_contained() {
        let registry = CallbackRegistry::new();
        registry
            .register(id("apr-1"), |_| panic!("callback failure"))
            .unwrap();

        assert_eq!(
            registry.dispatch(&id("apr-1"), json!({})),
            DispatchOutcome::Delivered
        );
        assert!(!registry.contains(&id("apr-1")));
    }

    #[test]
    fn unregister_removes_without_invoking() {
        let registry = CallbackRegistry::new();
        registry
            .register(id("apr-1"), |_| panic!("must not run"))
            .unwrap();
        assert!(registry.unregister(&id("apr-1")));
        assert!(!registry.unregister(&id("apr-1")));
        assert_eq!(
            registry.dispatch(&id("apr-1"), json!({})),
            DispatchOutcome::NoWaiter
        );
    }

    #[tokio::test]
    async fn wait_returns_delivered_payload() {
        let registry = CallbackRegistry::new();
        let sender = registry.clone();
        let delivery = tokio::spawn(async move {
            while !sender.contains(&id("apr-1")) {
                tokio::task::yield_now().await;
            }
            sender.dispatch(&id("apr-1"), json!({"approvalId": "apr-1", "status": "APPROVED"}))
        });

        let outcome = registry
            .wait_for_approval(id("apr-1"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApprovalWait::Notified(json!({"approvalId": "apr-1", "status": "APPROVED"}))
        );
        assert_eq!(delivery.await.unwrap(), DispatchOutcome::Delivered);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn timeout_leaves_registry_empty() {
        let registry = CallbackRegistry::new();
        let outcome = registry
            .wait_for_approval(id("apr-1"), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(outcome, ApprovalWait::TimedOut);
        assert!(registry.is_empty());
        assert_eq!(
            registry.dispatch(&id("apr-1"), json!({})),
            DispatchOutcome::NoWaiter
        );
    }

    #[tokio::test]
    async fn deadline_after_claim_returns_payload() {
        let registry = CallbackRegistry::new();
        let (tx, rx) = oneshot::channel();
        let (claimed_tx, claimed_rx) = std::sync::mpsc::channel();
        let token = registry
            .register_entry(
                id("apr-1"),
                Box::new(move |payload| {
                    claimed_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    let _ = tx.send(payload);
                }),
            )
            .unwrap();

        let sender = registry.clone();
        let delivery = std::thread::spawn(move || {
            sender.dispatch(&id("apr-1"), json!({"approvalId": "apr-1", "status": "APPROVED"}))
        });
        // The entry is gone from the map but the payload has not been sent yet.
        claimed_rx.recv().unwrap();
        assert!(!registry.contains(&id("apr-1")));

        let outcome = registry
            .settle_expired(&id("apr-1"), token, rx, Duration::from_millis(20))
            .await;
        assert_eq!(
            outcome,
            ApprovalWait::Notified(json!({"approvalId": "apr-1", "status": "APPROVED"}))
        );
        assert!(registry.is_empty());
        assert_eq!(delivery.join().unwrap(), DispatchOutcome::Delivered);
    }

    #[tokio::test]
    async fn deadline_without_claim_removes_entry() {
        let registry = CallbackRegistry::new();
        let (tx, rx) = oneshot::channel::<Value>();
        let token = registry
            .register_entry(
                id("apr-1"),
                Box::new(move |payload| {
                    let _ = tx.send(payload);
                }),
            )
            .unwrap();

        let outcome = registry
            .settle_expired(&id("apr-1"), token, rx, Duration::from_millis(20))
            .await;
        assert_eq!(outcome, ApprovalWait::TimedOut);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropped_wait_unregisters() {
        let registry = CallbackRegistry::new();
        let wait = registry.wait_for_approval(id("apr-1"), Duration::from_secs(60));
        let _ = tokio::time::timeout(Duration::from_millis(10), wait).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn concurrent_waits_on_one_approval_are_rejected() {
        let registry = CallbackRegistry::new();
        let waiter = registry.clone();
        let first = tokio::spawn(async move {
            waiter
                .wait_for_approval(id("apr-1"), Duration::from_secs(5))
                .await
        });
        while !registry.contains(&id("apr-1")) {
            tokio::task::yield_now().await;
        }

        let err = registry
            .wait_for_approval(id("apr-1"), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::AlreadyRegistered { .. }));

        registry.dispatch(&id("apr-1"), json!({"ok": true}));
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.into_payload(), Some(json!({"ok": true})));
    }
}
