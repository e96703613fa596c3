use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;

/// Completion callback of a check. Receives the unread count, or `None` when
/// the check produced no new information.
pub type CheckCallback = Box<dyn FnOnce(Option<usize>) + Send + 'static>;

struct Delivery {
    domain: String,
    unread: Option<usize>,
    callback: CheckCallback,
}

/// Runs every check callback on one dispatcher task, in the order the
/// deliveries were queued.
///
/// A callback never runs while the registry lock is held, and a panicking
/// callback is logged and does not take the dispatcher down with it.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Notifier {
    /// Spawns the dispatcher. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let Delivery {
                    domain,
                    unread,
                    callback,
                } = delivery;
                if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(unread))) {
                    tracing::error!(
                        domain = %domain,
                        error = %panic_message(panic.as_ref()),
                        "Check callback panicked"
                    );
                }
            }
            tracing::debug!("Notification dispatcher stopped");
        });

        Self { tx }
    }

    pub fn deliver(&self, domain: &str, unread: Option<usize>, callback: CheckCallback) {
        let delivery = Delivery {
            domain: domain.to_string(),
            unread,
            callback,
        };
        if self.tx.send(delivery).is_err() {
            // Runtime is shutting down
            tracing::debug!(domain = %domain, "Dispatcher gone, dropping check callback");
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_callbacks_run_in_queue_order() {
        let notifier = Notifier::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..5 {
            let seen = Arc::clone(&seen);
            notifier.deliver(
                "example.com",
                Some(n),
                Box::new(move |unread| seen.lock().unwrap().push(unread)),
            );
        }

        let (done_tx, done_rx) = oneshot::channel();
        notifier.deliver(
            "example.com",
            None,
            Box::new(move |_| {
                let _ = done_tx.send(());
            }),
        );
        done_rx.await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_dispatcher() {
        let notifier = Notifier::spawn();
        notifier.deliver("example.com", None, Box::new(|_| panic!("boom")));

        let (done_tx, done_rx) = oneshot::channel();
        notifier.deliver(
            "example.com",
            Some(3),
            Box::new(move |unread| {
                let _ = done_tx.send(unread);
            }),
        );
        assert_eq!(done_rx.await.unwrap(), Some(3));
    }
}
