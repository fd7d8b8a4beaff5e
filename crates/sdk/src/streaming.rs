//! Reconnecting stream wrappers.
//!
//! Provides a stream wrapper that automatically reconnects on disconnect
//! and resumes from the last position.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, stream::BoxStream};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    config::RetryPolicy,
    error::{Result, SdkError},
    ledger::{EventCursor, MintEvent},
    retry::backoff_for_attempt,
};

/// Position tracker for stream resumption.
///
/// This trait allows the stream to track the position of the last
/// successfully received item for seamless reconnection.
pub trait PositionTracker: Clone + Send + 'static {
    /// The item type being streamed.
    type Item;

    /// Resumption point handed to the reconnect function.
    type Position: Send;

    /// Updates position based on received item.
    fn update(&mut self, item: &Self::Item);

    /// Returns the current position for reconnection.
    fn position(&self) -> Self::Position;
}

/// Event-cursor tracker for mint event streams.
///
/// Clones share state, so the owner of the stream can observe or seed the
/// cursor the stream will resume from.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    last: Arc<Mutex<Option<EventCursor>>>,
}

impl CursorTracker {
    /// Creates a tracker that has not seen any event yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `cursor` as seen, unless a later cursor already was.
    pub fn advance_to(&self, cursor: EventCursor) {
        let mut last = self.last.lock();
        if last.is_none_or(|current| cursor > current) {
            *last = Some(cursor);
        }
    }

    /// Returns the last cursor seen.
    #[must_use]
    pub fn last(&self) -> Option<EventCursor> {
        *self.last.lock()
    }
}

impl PositionTracker for CursorTracker {
    type Item = MintEvent;
    type Position = Option<EventCursor>;

    fn update(&mut self, item: &Self::Item) {
        self.advance_to(item.cursor);
    }

    fn position(&self) -> Self::Position {
        self.last()
    }
}

/// Connection phase reported to a [`ReconnectingStream`] observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// A stream was opened successfully.
    Connected,
    /// The stream dropped; reconnect attempt `attempt` is pending.
    Reconnecting {
        /// 1-based reconnect attempt.
        attempt: u32,
    },
    /// The reconnect budget is spent; the stream has ended.
    Exhausted,
}

/// Callback receiving [`StreamPhase`] transitions.
pub type PhaseObserver = Arc<dyn Fn(StreamPhase) + Send + Sync>;

/// A stream wrapper that automatically reconnects on disconnect.
///
/// `ReconnectingStream` wraps an underlying stream and handles:
/// - Automatic reconnection when the stream ends or errors transiently
/// - Exponential backoff between reconnection attempts
/// - Position-based resumption via a callback
///
/// # State Machine
///
/// ```text
/// ┌────────────┐   ok    ┌─────────┐   error/end   ┌─────────┐
/// │ Connecting │ ──────▶ │ Active  │ ────────────▶ │ Backoff │
/// └────────────┘         └─────────┘               └─────────┘
///     ▲   │ err                                         │
///     │   └──────────────▶ Backoff / Exhausted          │
///     └─────────────────── reconnect_fn(position) ──────┘
/// ```
///
/// The attempt counter resets whenever a connection succeeds, so the
/// budget applies to each disconnect episode.
pub struct ReconnectingStream<T, P, F, Fut>
where
    T: Send + 'static,
    P: PositionTracker<Item = T>,
    F: FnMut(P::Position) -> Fut + Send + 'static,
    Fut: Future<Output = Result<BoxStream<'static, Result<T>>>> + Send + 'static,
{
    state: StreamState<T, Fut>,
    position: P,
    retry_policy: RetryPolicy,
    reconnect_fn: F,
    reconnect_attempt: u32,
    observer: Option<PhaseObserver>,
}

enum StreamState<T, Fut>
where
    T: Send + 'static,
    Fut: Future<Output = Result<BoxStream<'static, Result<T>>>> + Send + 'static,
{
    /// Stream is active and producing items.
    Active(BoxStream<'static, Result<T>>),
    /// Waiting for reconnection with backoff.
    Backoff(Pin<Box<tokio::time::Sleep>>),
    /// Reconnecting - awaiting new stream.
    Connecting(Pin<Box<Fut>>),
    /// Terminal state - max reconnection attempts exceeded.
    Exhausted,
    /// Temporary state during transitions.
    Transitioning,
}

impl<T, P, F, Fut> ReconnectingStream<T, P, F, Fut>
where
    T: Send + 'static,
    P: PositionTracker<Item = T>,
    F: FnMut(P::Position) -> Fut + Send + 'static,
    Fut: Future<Output = Result<BoxStream<'static, Result<T>>>> + Send + 'static,
{
    /// Wraps an already-open stream.
    ///
    /// # Arguments
    ///
    /// * `stream` - The initial stream to wrap
    /// * `position` - Position tracker for resumption
    /// * `retry_policy` - Policy for reconnection backoff
    /// * `reconnect_fn` - Function to create new stream from position
    pub fn new(
        stream: BoxStream<'static, Result<T>>,
        position: P,
        retry_policy: RetryPolicy,
        reconnect_fn: F,
    ) -> Self {
        Self {
            state: StreamState::Active(stream),
            position,
            retry_policy,
            reconnect_fn,
            reconnect_attempt: 0,
            observer: None,
        }
    }

    /// Creates a stream whose first connection is opened lazily through
    /// `reconnect_fn`, with the same backoff as later reconnects.
    pub fn connecting(position: P, retry_policy: RetryPolicy, mut reconnect_fn: F) -> Self {
        let fut = reconnect_fn(position.position());
        Self {
            state: StreamState::Connecting(Box::pin(fut)),
            position,
            retry_policy,
            reconnect_fn,
            reconnect_attempt: 0,
            observer: None,
        }
    }

    /// Registers a callback for connection phase transitions.
    #[must_use]
    pub fn with_observer(mut self, observer: PhaseObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns the position tracker.
    pub fn position(&self) -> &P {
        &self.position
    }

    fn notify(&self, phase: StreamPhase) {
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }

    /// Moves to backoff if the budget allows, otherwise to exhausted.
    /// Returns false when exhausted.
    fn schedule_reconnect(&mut self) -> bool {
        if self.reconnect_attempt >= self.retry_policy.max_attempts {
            self.state = StreamState::Exhausted;
            self.notify(StreamPhase::Exhausted);
            return false;
        }
        self.reconnect_attempt += 1;
        let backoff = backoff_for_attempt(&self.retry_policy, self.reconnect_attempt);
        debug!(
            attempt = self.reconnect_attempt,
            backoff_ms = backoff.as_millis() as u64,
            "reconnecting after backoff"
        );
        self.notify(StreamPhase::Reconnecting { attempt: self.reconnect_attempt });
        self.state = StreamState::Backoff(Box::pin(tokio::time::sleep(backoff)));
        true
    }
}

impl<T, P, F, Fut> Stream for ReconnectingStream<T, P, F, Fut>
where
    T: Send + 'static,
    P: PositionTracker<Item = T> + Unpin,
    F: FnMut(P::Position) -> Fut + Send + Unpin + 'static,
    Fut: Future<Output = Result<BoxStream<'static, Result<T>>>> + Send + 'static,
{
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Take ownership of state temporarily
            let state = std::mem::replace(&mut self.state, StreamState::Transitioning);

            match state {
                StreamState::Active(mut stream) => match stream.as_mut().poll_next(cx) {
                    Poll::Ready(Some(Ok(item))) => {
                        self.position.update(&item);
                        self.state = StreamState::Active(stream);
                        return Poll::Ready(Some(Ok(item)));
                    },
                    Poll::Ready(Some(Err(err))) => {
                        if err.is_retryable() {
                            debug!(error = %err, "stream disconnected");
                            if self.schedule_reconnect() {
                                continue;
                            }
                        } else {
                            self.state = StreamState::Exhausted;
                            self.notify(StreamPhase::Exhausted);
                        }
                        return Poll::Ready(Some(Err(SdkError::SubscriptionDropped {
                            message: err.to_string(),
                        })));
                    },
                    Poll::Ready(None) => {
                        debug!("stream ended");
                        if self.schedule_reconnect() {
                            continue;
                        }
                        return Poll::Ready(None);
                    },
                    Poll::Pending => {
                        self.state = StreamState::Active(stream);
                        return Poll::Pending;
                    },
                },
                StreamState::Backoff(mut sleep) => match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        let position = self.position.position();
                        let fut = (self.reconnect_fn)(position);
                        self.state = StreamState::Connecting(Box::pin(fut));
                        continue;
                    },
                    Poll::Pending => {
                        self.state = StreamState::Backoff(sleep);
                        return Poll::Pending;
                    },
                },
                StreamState::Connecting(mut fut) => match fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(stream)) => {
                        debug!(attempt = self.reconnect_attempt, "stream connected");
                        self.reconnect_attempt = 0;
                        self.notify(StreamPhase::Connected);
                        self.state = StreamState::Active(stream);
                        continue;
                    },
                    Poll::Ready(Err(e)) => {
                        warn!(attempt = self.reconnect_attempt, error = %e, "connection attempt failed");
                        if self.schedule_reconnect() {
                            continue;
                        }
                        return Poll::Ready(Some(Err(e)));
                    },
                    Poll::Pending => {
                        self.state = StreamState::Connecting(fut);
                        return Poll::Pending;
                    },
                },
                StreamState::Exhausted => {
                    self.state = StreamState::Exhausted;
                    return Poll::Ready(None);
                },
                StreamState::Transitioning => {
                    self.state = StreamState::Exhausted;
                    return Poll::Ready(Some(Err(SdkError::SubscriptionDropped {
                        message: "internal state error".to_owned(),
                    })));
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use datemint_types::{Address, DateKey};
    use futures::{FutureExt, StreamExt, stream};

    use super::*;
    use crate::error::FaultKind;

    fn event(block: u64) -> MintEvent {
        MintEvent {
            key: DateKey::from_ymd(2025, 1, 1).unwrap(),
            minter: Address::new([1; 20]),
            cursor: EventCursor::new(block, 0),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    // =========================================================================
    // CursorTracker
    // =========================================================================

    #[test]
    fn test_cursor_tracker_starts_empty() {
        let tracker = CursorTracker::new();
        assert_eq!(tracker.position(), None);
    }

    #[test]
    fn test_cursor_tracker_only_advances() {
        let mut tracker = CursorTracker::new();
        tracker.update(&event(5));
        tracker.update(&event(3));
        assert_eq!(tracker.last(), Some(EventCursor::new(5, 0)));
        tracker.advance_to(EventCursor::new(5, 1));
        assert_eq!(tracker.position(), Some(EventCursor::new(5, 1)));
    }

    #[test]
    fn test_cursor_tracker_clones_share_state() {
        let tracker = CursorTracker::new();
        let clone = tracker.clone();
        clone.advance_to(EventCursor::new(9, 0));
        assert_eq!(tracker.last(), Some(EventCursor::new(9, 0)));
    }

    // =========================================================================
    // ReconnectingStream
    // =========================================================================

    #[tokio::test]
    async fn test_resumes_from_last_position_after_end() {
        let resumed_from = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&resumed_from);
        let first = stream::iter(vec![Ok(event(1)), Ok(event(2))]).boxed();

        let mut s = ReconnectingStream::new(
            first,
            CursorTracker::new(),
            fast_policy(3),
            move |position: Option<EventCursor>| {
                seen.lock().push(position);
                async move { Ok(stream::iter(vec![Ok(event(3))]).boxed()) }.boxed()
            },
        );

        let mut blocks = Vec::new();
        for _ in 0..3 {
            blocks.push(s.next().await.unwrap().unwrap().cursor.block);
        }
        assert_eq!(blocks, vec![1, 2, 3]);
        assert_eq!(resumed_from.lock()[0], Some(EventCursor::new(2, 0)));
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let phases = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&phases);

        let mut s = ReconnectingStream::connecting(
            CursorTracker::new(),
            fast_policy(2),
            move |_position: Option<EventCursor>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<BoxStream<'static, Result<MintEvent>>, _>(SdkError::remote(FaultKind::Unavailable, "down")) }
                    .boxed()
            },
        )
        .with_observer(Arc::new(move |phase: StreamPhase| recorded.lock().push(phase)));

        let err = s.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(s.next().await.is_none());
        // initial attempt + 2 reconnects
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(phases.lock().last(), Some(&StreamPhase::Exhausted));
    }

    #[tokio::test]
    async fn test_non_retryable_item_error_ends_stream() {
        let first = stream::iter(vec![Err(SdkError::remote(FaultKind::Internal, "bad filter"))]).boxed();
        let mut s = ReconnectingStream::new(
            first,
            CursorTracker::new(),
            fast_policy(3),
            |_position: Option<EventCursor>| {
                async { Ok(stream::empty().boxed()) }.boxed()
            },
        );

        assert!(matches!(s.next().await, Some(Err(SdkError::SubscriptionDropped { .. }))));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn test_observer_sees_connected_after_lazy_connect() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&phases);
        let mut s = ReconnectingStream::connecting(
            CursorTracker::new(),
            fast_policy(1),
            |_position: Option<EventCursor>| {
                async { Ok(stream::iter(vec![Ok(event(4))]).chain(stream::pending()).boxed()) }
                    .boxed()
            },
        )
        .with_observer(Arc::new(move |phase: StreamPhase| recorded.lock().push(phase)));

        assert_eq!(s.next().await.unwrap().unwrap().cursor.block, 4);
        assert_eq!(phases.lock().as_slice(), &[StreamPhase::Connected]);
        assert_eq!(s.position().last(), Some(EventCursor::new(4, 0)));
    }
}
