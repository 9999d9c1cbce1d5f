use futures::prelude::*;
pub use kube::runtime::watcher::{Event, Result};
use std::pin::Pin;
use tokio::time;
use tracing::{info, Instrument};

type Events<T> = Pin<Box<dyn Stream<Item = Result<Event<T>>> + Send + 'static>>;

/// Wraps a watch event stream, pausing after errors.
pub struct Watch<T> {
    span: tracing::Span,
    rx: Events<T>,
}

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Self::new(watch.boxed())
    }
}

impl<T> Watch<T> {
    pub fn new(rx: Events<T>) -> Watch<T> {
        Self {
            rx,
            span: tracing::Span::current(),
        }
    }

    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Receive the next event in the stream, or `None` once it ends.
    ///
    /// If the stream fails, log the error and sleep for 1s before polling again.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            match self.rx.next().instrument(self.span.clone()).await? {
                Ok(ev) => return Some(ev),
                Err(error) => {
                    info!(parent: &self.span, %error, "Watch failed");
                    time::sleep(time::Duration::from_secs(1)).await;
                    info!(parent: &self.span, "Restarting");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order() {
        let events = futures::stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(1)),
            Ok(Event::InitDone),
            Ok(Event::Apply(2)),
        ]);
        let mut watch = Watch::from(events);

        assert!(matches!(watch.recv().await, Some(Event::Init)));
        assert!(matches!(watch.recv().await, Some(Event::InitApply(1))));
        assert!(matches!(watch.recv().await, Some(Event::InitDone)));
        assert!(matches!(watch.recv().await, Some(Event::Apply(2))));
        assert!(watch.recv().await.is_none());
    }
}
