use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use oreflow_errors::{OreflowError, OreflowResult};
use tokio::sync::oneshot;

/// Create a connected [`Completer`]/[`Promise`] pair.
pub fn promise<T>() -> (Completer<T>, Promise<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Promise { rx })
}

/// The consuming half: a single-owner future yielding the completed result.
///
/// Dropping a promise is cancellation; the completer side learns nobody is
/// listening (see [`Completer::resolve`]). A promise whose completer is
/// dropped resolves to [`OreflowError::Dropped`].
#[derive(Debug)]
pub struct Promise<T> {
    rx: oneshot::Receiver<OreflowResult<T>>,
}

impl<T> Future for Promise<T> {
    type Output = OreflowResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| match received {
                Ok(result) => result,
                Err(_) => Err(OreflowError::Dropped),
            })
    }
}

/// The resolving half.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<OreflowResult<T>>,
}

impl<T> Completer<T> {
    /// Resolve with a value. If the promise was dropped, the value is handed
    /// back so the caller can reclaim whatever it represents.
    pub fn resolve(self, value: T) -> Result<(), T> {
        self.tx.send(Ok(value)).map_err(|rejected| {
            match rejected {
                Ok(value) => value,
                Err(_) => unreachable!("we sent Ok"),
            }
        })
    }

    /// Fail with an error. A dropped promise ignores the failure.
    pub fn fail(self, error: OreflowError) {
        let _ = self.tx.send(Err(error));
    }

    /// Complete with an already-formed result.
    pub fn complete(self, result: OreflowResult<T>) {
        let _ = self.tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves() {
        let (completer, promise) = promise::<u32>();
        assert_eq!(completer.resolve(7), Ok(()));
        assert_eq!(promise.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn fails() {
        let (completer, promise) = promise::<u32>();
        completer.fail(OreflowError::Dropped);
        assert!(promise.await.is_err());
    }

    #[tokio::test]
    async fn dropped_completer_fails_the_promise() {
        let (completer, promise) = promise::<u32>();
        drop(completer);
        assert!(matches!(promise.await, Err(OreflowError::Dropped)));
    }

    #[tokio::test]
    async fn dropped_promise_hands_the_value_back() {
        let (completer, promise) = promise::<u32>();
        drop(promise);
        assert_eq!(completer.resolve(7), Err(7));
    }
}
