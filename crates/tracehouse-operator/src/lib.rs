//! Certificate management for the Tracehouse operator.
//!
//! The [`certrotation`] module is the heart of this crate: it decides, once
//! per reconciliation, which of the internal TLS credentials of a Tracehouse
//! stack must be (re)issued and materializes the full desired set of
//! credential objects. The [`time`] module provides the human-readable
//! [`Duration`](crate::time::Duration) type used to configure the rotation
//! windows, and [`meta`] holds the labels stamped onto every emitted object.
//!
//! All rotation state lives in the emitted objects themselves, and all
//! decisions are pure functions of the previously materialized objects, the
//! rotation policy and an injected "now". The reconciler owns every piece of
//! I/O and every clock read.
pub mod certrotation;
pub mod meta;
pub mod time;
