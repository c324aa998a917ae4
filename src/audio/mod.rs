//! Audio buffer and I/O utilities
//!
//! This module provides the core audio data structure and WAV file I/O.

mod buffer;
mod io;

pub use buffer::AudioBuffer;
pub use io::{read_sound_file, write_sound_file};
