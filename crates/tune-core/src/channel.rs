//! Control-channel transport seam.
//!
//! Round trips are synchronous: the caller blocks until the handler has
//! produced a reply or failed. There is no queueing and no timeout.

use crate::error::TuneResult;
use crate::protocol::Envelope;

/// Delivers control queries to whoever answers them.
pub trait ControlChannel {
    /// Deliver a request envelope and return the handler's reply.
    ///
    /// An `Err` means nobody answered: the request was malformed, failed
    /// validation or the device rejected it.
    fn round_trip(&mut self, request: Envelope) -> TuneResult<Envelope>;

    /// Deliver a fire-and-forget event.
    fn send_event(&mut self, event: Envelope) -> TuneResult<()>;
}

impl<C: ControlChannel + ?Sized> ControlChannel for &mut C {
    fn round_trip(&mut self, request: Envelope) -> TuneResult<Envelope> {
        (**self).round_trip(request)
    }

    fn send_event(&mut self, event: Envelope) -> TuneResult<()> {
        (**self).send_event(event)
    }
}
