//! Discover and control LIFX bulbs over the local network.
//!
//! [discover] broadcasts a service query and lazily yields a [UdpBulb] handle for every bulb
//! that answers before the deadline.  Each handle speaks one synchronous UDP request/response
//! dialog per call, on its own short-lived socket, so handles can be used concurrently
//! without coordinating:
//!
//! ```no_run
//! use std::time::Duration;
//! use lifx_lan::{discover, Bulb, Power};
//!
//! # fn main() -> Result<(), lifx_lan::Error> {
//! for bulb in discover(Duration::from_secs(5))? {
//!     let state = bulb.state(Duration::from_secs(1))?;
//!     println!("{} is {}", state.label, state.power);
//!     bulb.set_power(Power::Off, Duration::from_millis(500), Duration::from_secs(1))?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Deadlines are caller-supplied per call; a request that gets no answer in time fails with
//! [Error::NoResponse], which is retryable.  For the raw wire format underneath, see the
//! `lifx-proto` crate.

use std::sync::OnceLock;
use std::time::Duration;

mod bulb;
mod color;
mod discover;
mod error;

pub use bulb::UdpBulb;
pub use color::{
    Hsbk, InvalidColor, Power, MAX_BRIGHTNESS, MAX_HUE, MAX_KELVIN, MAX_SATURATION,
    MIN_BRIGHTNESS, MIN_HUE, MIN_KELVIN, MIN_SATURATION,
};
pub use discover::{discover, Discovery};
pub use error::{Error, TransportError};

/// Largest datagram a bulb sends in this protocol subset; reply reads use this much buffer.
pub(crate) const RECV_BUF_SIZE: usize = 256;

/// A snapshot of a bulb at a given time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub label: String,
    pub power: Power,
    pub color: Hsbk,
}

/// The capabilities of a LIFX bulb.
///
/// Implemented by [UdpBulb] for real bulbs; tests substitute fakes.  Each method blocks for
/// at most `timeout`.
pub trait Bulb {
    /// Reads the current [State] of the bulb.
    fn state(&self, timeout: Duration) -> Result<State, Error>;

    /// Sets the power, smoothing the change over `transition`.
    fn set_power(&self, power: Power, transition: Duration, timeout: Duration)
        -> Result<(), Error>;

    /// Sets the color, smoothing the change over `transition`.
    ///
    /// Every component of `color` is validated first; if any is out of range, nothing is sent
    /// and the returned [InvalidColor] carries the offending components.
    fn set_color(&self, color: Hsbk, transition: Duration, timeout: Duration)
        -> Result<(), Error>;
}

/// The process-wide source identifier stamped into every outgoing header.
///
/// Bulbs unicast their replies back to the socket that used this value.  Zero would be legal
/// but makes bulbs answer by broadcast, so it is never picked.
pub(crate) fn process_source() -> u32 {
    static SOURCE: OnceLock<u32> = OnceLock::new();
    *SOURCE.get_or_init(|| loop {
        let source: u32 = rand::random();
        if source != 0 {
            break source;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_stable_and_nonzero() {
        let first = process_source();
        assert_ne!(first, 0);
        assert_eq!(process_source(), first);
    }
}
