//! surge - bounded lock-free ring buffers for every producer/consumer shape.
//!
//! A family of fixed-capacity, FIFO ring buffers built on one protocol:
//! fetch-and-add ticket claims plus a per-slot sequence stamp. There is no
//! mutex, no condition variable, and no compare-and-swap retry loop on any
//! cursor; every operation completes in a bounded number of its own steps
//! once its slot's peer has made the progress the state machine requires.
//!
//! ## Picking a ring
//!
//! | Threads producing | Threads consuming | Type |
//! |---|---|---|
//! | 1 | 1 | [`SpscRing`] |
//! | N | 1 | [`MpscRing`] |
//! | 1 | N | [`SpmcRing`] |
//! | N | N | [`MpmcRing`] |
//!
//! The simpler variants exist because each sheds work the general case
//! cannot: single-sided cursors stay thread-private and skip the
//! fetch-and-add entirely.
//!
//! ## Payload
//!
//! Each slot carries one [`Handle`] - an opaque machine word (a pointer or a
//! table index) the ring transfers but never interprets. Callers moving
//! anything larger than a word allocate it externally and pass the handle.
//!
//! ## Example
//!
//! ```
//! use surge::{Handle, SpscRing};
//!
//! let ring = SpscRing::new(8).unwrap();
//! ring.push(Handle::from_usize(5));
//! ring.close();
//!
//! assert_eq!(ring.pop(), Some(Handle::from_usize(5)));
//! assert_eq!(ring.pop(), None); // closed and drained
//! ```
//!
//! ## Termination
//!
//! `close()` latches a flag; producers stop (a `push` on a closed ring is a
//! silent drop), consumers drain what was published, then `pop` returns
//! `None` and `consume` returns. `push` and `pop` otherwise spin with
//! backoff - there are no timeouts. A caller that needs one layers it
//! externally, e.g. a watchdog thread that calls `close()`.

pub mod constants;
pub mod error;
pub mod metrics;
pub mod ring;

mod trace;

pub use error::{Result, SurgeError};
pub use metrics::MetricsSnapshot;
pub use ring::{Handle, Iter, MpmcRing, MpscRing, Sequence, SpmcRing, SpscRing};
