//! Wait primitives over the event [`Bus`].
//!
//! Both helpers subscribe through [`with_subscription`], so the subscription is
//! released whether they match, get cancelled, or see the bus close.

use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{Bus, EngineStatus, Event, EventSource, ServiceStatus, with_subscription};

/// Outcome of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A matching event arrived.
    Matched(Event),
    /// The token was cancelled first.
    Cancelled,
    /// The subscription was closed before a match.
    Closed,
}

impl WaitOutcome {
    /// Returns the matched event, if any.
    pub fn matched(self) -> Option<Event> {
        match self {
            WaitOutcome::Matched(ev) => Some(ev),
            _ => None,
        }
    }
}

/// Waits for a service event whose name matches `pattern` and whose state matches `listen`.
///
/// [`ServiceStatus::ANY`] accepts every service event for matching names.
pub async fn wait_for_service(
    bus: &Bus,
    token: &CancellationToken,
    pattern: &Regex,
    listen: ServiceStatus,
) -> WaitOutcome {
    wait_until(bus, token, |ev| {
        ev.source == EventSource::Service
            && ev.status.matches(listen)
            && ev.service.as_deref().is_some_and(|name| pattern.is_match(name))
    })
    .await
}

/// Waits for the engine to report [`EngineStatus::UP`].
pub async fn wait_for_engine(bus: &Bus, token: &CancellationToken) -> WaitOutcome {
    wait_until(bus, token, |ev| {
        ev.source == EventSource::Engine && ev.engine.matches(EngineStatus::UP)
    })
    .await
}

async fn wait_until<F>(bus: &Bus, token: &CancellationToken, accept: F) -> WaitOutcome
where
    F: Fn(&Event) -> bool,
{
    with_subscription(bus, None, |mut rx| async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return WaitOutcome::Cancelled,
                ev = rx.recv() => match ev {
                    Some(ev) if accept(&ev) => return WaitOutcome::Matched(ev),
                    Some(_) => continue,
                    None => return WaitOutcome::Closed,
                },
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn matches_service_by_pattern_and_mask() {
        let bus = Bus::new();
        let token = CancellationToken::new();
        let pattern = Regex::new("^db-").unwrap();

        let waiter = {
            let bus = bus.clone();
            let token = token.clone();
            tokio::spawn(async move {
                wait_for_service(&bus, &token, &pattern, ServiceStatus::HEALTHY).await
            })
        };

        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        bus.publish(Event::service("db-main", ServiceStatus::STARTED));
        bus.publish(Event::service("web", ServiceStatus::HEALTHY));
        bus.publish(Event::service("db-main", ServiceStatus::HEALTHY));

        let ev = waiter.await.unwrap().matched().unwrap();
        assert_eq!(ev.service.as_deref(), Some("db-main"));
        assert_eq!(ev.status, ServiceStatus::HEALTHY);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn engine_wait_is_cancellable() {
        let bus = Bus::new();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        assert_eq!(wait_for_engine(&bus, &token).await, WaitOutcome::Cancelled);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn engine_wait_matches_up() {
        let bus = Bus::new();
        let token = CancellationToken::new();
        let waiter = {
            let bus = bus.clone();
            let token = token.clone();
            tokio::spawn(async move { wait_for_engine(&bus, &token).await })
        };
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        bus.publish(Event::engine(EngineStatus::SHUTDOWN));
        bus.publish(Event::engine(EngineStatus::UP));
        let ev = waiter.await.unwrap().matched().unwrap();
        assert_eq!(ev.engine, EngineStatus::UP);
    }

    #[tokio::test]
    async fn closed_bus_ends_wait() {
        let bus = Bus::new();
        let token = CancellationToken::new();
        let waiter = {
            let bus = bus.clone();
            let token = token.clone();
            tokio::spawn(async move { wait_for_engine(&bus, &token).await })
        };
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        bus.close_all();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Closed);
    }
}
