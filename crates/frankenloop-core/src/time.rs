use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use promise::{Deferred, DeferredFuture};

use crate::host::Host;

/// Completes once `duration` has elapsed on `host`.
///
/// The timer is armed immediately, not on first poll.
pub fn sleep(host: &dyn Host, duration: Duration) -> Sleep {
    let deferred = Deferred::new();
    let signal = deferred.clone();
    host.set_timeout(
        duration,
        Box::new(move || {
            signal.resolve(());
        }),
    );
    Sleep {
        inner: deferred.future(),
    }
}

#[must_use = "futures do nothing unless awaited"]
pub struct Sleep {
    inner: DeferredFuture<()>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A host that drops the timer without running it ends the sleep too.
        Pin::new(&mut self.inner).poll(cx).map(|_| ())
    }
}
