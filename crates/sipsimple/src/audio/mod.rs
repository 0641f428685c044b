//! Playback helpers over an abstract media engine
//!
//! The media engine itself is outside this crate; it is reached through the
//! [`ConferenceBridge`], [`ToneGenerator`], [`WavePlayer`] and
//! [`WavePlayerFactory`] traits.

pub mod tones;
pub mod wave_file;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::notification::SenderId;
use crate::error::Result;

pub use tones::PersistentTones;
pub use wave_file::SilenceableWaveFile;

/// Conference bridge slot number; slot 0 is the sound device
pub type SlotId = u32;

/// Default playback volume (percent)
pub const DEFAULT_VOLUME: u8 = 100;

/// A dual frequency tone; a frequency of 0 is silence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub frequency1: u16,
    pub frequency2: u16,
    pub duration: Duration,
}

impl Tone {
    pub fn new(frequency1: u16, frequency2: u16, duration_ms: u64) -> Self {
        Self {
            frequency1,
            frequency2,
            duration: Duration::from_millis(duration_ms),
        }
    }

    pub fn silence(duration_ms: u64) -> Self {
        Self::new(0, 0, duration_ms)
    }
}

pub trait ConferenceBridge: Send + Sync {
    fn connect_slots(&self, source: SlotId, destination: SlotId) -> Result<()>;
}

pub trait ToneGenerator: Send + Sync {
    fn is_active(&self) -> bool;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn play_tones(&self, tones: &[Tone]) -> Result<()>;
    /// Bridge slot, available once started
    fn slot(&self) -> Option<SlotId>;
    fn set_volume(&self, volume: u8);
}

/// A started wave file player.
///
/// Implementations post `WaveFileDidFinishPlaying` with [`WavePlayer::sender`]
/// as sender when playback reaches the end of the file.
pub trait WavePlayer: Send + Sync {
    fn sender(&self) -> SenderId;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn slot(&self) -> Option<SlotId>;
    fn set_volume(&self, volume: u8);
}

pub trait WavePlayerFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn WavePlayer>>;
}
