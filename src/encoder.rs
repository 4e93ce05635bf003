//! Rotary encoders with push switches.
//!
//! - `decoder` - pure Gray-code and switch debounce state machines
//! - `worker` - per-encoder consumer thread that owns the decode state and
//!   talks to the transport

pub mod decoder;
pub mod worker;

pub use decoder::{Direction, PinState, RotaryLine};
pub use worker::{EncoderEvent, EncoderWorker};
