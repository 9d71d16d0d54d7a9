use crate::error::DonkyError;
use crate::notification::now_millis;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Fixed advance delay after a failed task, kept deliberately flat (no
/// exponential growth or jitter) to match the original queue behaviour.
pub const DEFAULT_TASK_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Account-mutation operations that must never race each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceTaskKind {
    UpdateRegistration,
    UpdateUser,
    UpdateDevice,
    UpdateTags,
    UpdateAdditionalProperties,
}

impl SequenceTaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpdateRegistration => "update-registration",
            Self::UpdateUser => "update-user",
            Self::UpdateDevice => "update-device",
            Self::UpdateTags => "update-tags",
            Self::UpdateAdditionalProperties => "update-additional-properties",
        }
    }
}

/// Terminal signal for one queued task: exactly one per task, carrying
/// the lifecycle timestamps contracted to callers.
#[derive(Debug)]
pub struct TaskReport {
    pub kind: SequenceTaskKind,
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub outcome: Result<JsonValue, DonkyError>,
}

/// Receiver half of a task's completion. Dropping it makes the task
/// fire-and-forget; queue progression never depends on the caller.
pub struct TaskTicket {
    rx: oneshot::Receiver<TaskReport>,
}

impl TaskTicket {
    pub async fn wait(self) -> Result<TaskReport, DonkyError> {
        self.rx
            .await
            .map_err(|_| DonkyError::internal("sequence queue was dropped before completion"))
    }
}

type TaskOperation = Pin<Box<dyn Future<Output = Result<JsonValue, DonkyError>> + Send>>;

struct QueuedTask {
    kind: SequenceTaskKind,
    created_at: i64,
    operation: TaskOperation,
    done: oneshot::Sender<TaskReport>,
}

struct QueueState {
    queue: VecDeque<QueuedTask>,
    in_flight: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    retry_delay: Duration,
}

/// Strictly-ordered, single-flight queue of account-mutation tasks.
///
/// `enqueue` is safe from any number of concurrent tasks; admission order
/// is completion order. A task's completion, success or error, is the
/// sole trigger that starts the next one, so one stuck submission can
/// never starve the queue: the advance step is owned by the queue, not by
/// the caller's handling of the report.
pub struct SequenceTaskQueue {
    inner: Arc<Inner>,
}

impl Default for SequenceTaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_RETRY_DELAY)
    }
}

impl SequenceTaskQueue {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState { queue: VecDeque::new(), in_flight: false }),
                retry_delay,
            }),
        }
    }

    /// Appends a task and starts it immediately if the queue was idle.
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F>(&self, kind: SequenceTaskKind, operation: F) -> TaskTicket
    where
        F: Future<Output = Result<JsonValue, DonkyError>> + Send + 'static,
    {
        let (done, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().expect("sequence state poisoned");
            state.queue.push_back(QueuedTask {
                kind,
                created_at: now_millis(),
                operation: Box::pin(operation),
                done,
            });
            log::debug!("seq: queued {} ({} pending)", kind.as_str(), state.queue.len());
        }
        try_execute_next(self.inner.clone());
        TaskTicket { rx }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().expect("sequence state poisoned").queue.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().expect("sequence state poisoned");
        state.queue.is_empty() && !state.in_flight
    }
}

/// Pops and starts the head task unless one is already executing.
fn try_execute_next(inner: Arc<Inner>) {
    let task = {
        let mut state = inner.state.lock().expect("sequence state poisoned");
        if state.in_flight {
            return;
        }
        let Some(task) = state.queue.pop_front() else {
            return;
        };
        state.in_flight = true;
        task
    };
    tokio::spawn(run_task(inner, task));
}

/// Runs one task and then advances the queue. The advance is wrapped
/// around the operation unconditionally: whatever the outcome, the
/// in-flight flag clears and the next task gets its turn, after the
/// retry delay when the operation failed, immediately otherwise.
async fn run_task(inner: Arc<Inner>, task: QueuedTask) {
    let started_at = now_millis();
    log::debug!("seq: executing {}", task.kind.as_str());

    let outcome = task.operation.await;
    let failed = outcome.is_err();
    if let Err(err) = &outcome {
        log::warn!("seq: {} failed: {err}", task.kind.as_str());
    }

    // The caller may have dropped its ticket; ignore the send result.
    let _ = task.done.send(TaskReport {
        kind: task.kind,
        created_at: task.created_at,
        started_at,
        finished_at: now_millis(),
        outcome,
    });

    if failed {
        tokio::time::sleep(inner.retry_delay).await;
    }

    inner.state.lock().expect("sequence state poisoned").in_flight = false;
    try_execute_next(inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn ok_payload(index: usize) -> Result<JsonValue, DonkyError> {
        Ok(json!({ "index": index }))
    }

    /// The in-flight flag clears shortly after the report is delivered,
    /// not before, so idleness is awaited rather than asserted directly.
    async fn wait_until_idle(queue: &SequenceTaskQueue) {
        for _ in 0..100 {
            if queue.is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never went idle");
    }

    #[tokio::test]
    async fn completes_in_enqueue_order_without_overlap() {
        let queue = SequenceTaskQueue::new(Duration::from_millis(10));
        let executing = Arc::new(AtomicBool::new(false));
        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let mut tickets = Vec::new();
        for index in 0..16 {
            let executing = executing.clone();
            let order = order.clone();
            tickets.push(queue.enqueue(SequenceTaskKind::UpdateUser, async move {
                assert!(!executing.swap(true, Ordering::SeqCst), "tasks overlapped");
                tokio::time::sleep(Duration::from_millis(2)).await;
                order.lock().expect("order").push(index);
                executing.store(false, Ordering::SeqCst);
                ok_payload(index)
            }));
        }

        for (index, ticket) in tickets.into_iter().enumerate() {
            let report = ticket.wait().await.expect("report");
            assert_eq!(report.outcome.expect("success")["index"], index);
            assert!(report.created_at <= report.started_at);
            assert!(report.started_at <= report.finished_at);
        }
        assert_eq!(*order.lock().expect("order"), (0..16).collect::<Vec<_>>());
        wait_until_idle(&queue).await;
    }

    #[tokio::test]
    async fn earlier_task_completes_before_a_concurrently_enqueued_later_one_starts() {
        let queue = Arc::new(SequenceTaskQueue::new(Duration::from_millis(10)));
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let events = events.clone();
            queue.enqueue(SequenceTaskKind::UpdateUser, async move {
                events.lock().expect("events").push("user-start");
                tokio::time::sleep(Duration::from_millis(20)).await;
                events.lock().expect("events").push("user-done");
                Ok(JsonValue::Null)
            })
        };

        // Second producer races in from another task while the first runs.
        let second = {
            let queue = queue.clone();
            let events = events.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(SequenceTaskKind::UpdateTags, async move {
                        events.lock().expect("events").push("tags-start");
                        Ok(JsonValue::Null)
                    })
                    .wait()
                    .await
            })
        };

        first.wait().await.expect("first report").outcome.expect("first success");
        second.await.expect("join").expect("second report").outcome.expect("second success");

        let events = events.lock().expect("events").clone();
        let user_done = events.iter().position(|e| *e == "user-done").expect("user-done");
        let tags_start = events.iter().position(|e| *e == "tags-start").expect("tags-start");
        assert!(user_done < tags_start, "tags task started before user task completed: {events:?}");
    }

    #[tokio::test]
    async fn a_failing_task_delays_but_never_blocks_the_queue() {
        let retry_delay = Duration::from_millis(50);
        let queue = SequenceTaskQueue::new(retry_delay);

        let failing = queue.enqueue(SequenceTaskKind::UpdateDevice, async {
            Err(DonkyError::validation_failed(
                [("deviceName".to_owned(), "too long".to_owned())].into(),
            ))
        });
        let started = Instant::now();
        let follow_up = queue.enqueue(SequenceTaskKind::UpdateTags, async { Ok(JsonValue::Null) });

        let report = failing.wait().await.expect("failure report");
        let err = report.outcome.expect_err("validation error");
        assert_eq!(err.validation_failures().expect("failures")["deviceName"], "too long");

        follow_up.wait().await.expect("follow-up report").outcome.expect("follow-up success");
        assert!(
            started.elapsed() >= retry_delay,
            "advance after failure should wait out the retry delay"
        );
        wait_until_idle(&queue).await;
    }

    #[tokio::test]
    async fn dropped_tickets_do_not_stall_progression() {
        let queue = SequenceTaskQueue::new(Duration::from_millis(10));
        drop(queue.enqueue(SequenceTaskKind::UpdateRegistration, async { Ok(JsonValue::Null) }));
        drop(queue.enqueue(SequenceTaskKind::UpdateUser, async {
            Err(DonkyError::internal("boom"))
        }));

        let last = queue.enqueue(SequenceTaskKind::UpdateAdditionalProperties, async {
            Ok(json!({ "done": true }))
        });
        let report = last.wait().await.expect("report");
        assert_eq!(report.outcome.expect("success")["done"], true);
    }
}
