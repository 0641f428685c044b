//! Repeating tone sequences played through the conference bridge

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, warn};

use crate::audio::{ConferenceBridge, DEFAULT_VOLUME, Tone, ToneGenerator};
use crate::error::{Error, Result};

/// Plays a tone sequence now and then every `interval` until stopped
pub struct PersistentTones {
    bridge: Arc<dyn ConferenceBridge>,
    generator: Arc<dyn ToneGenerator>,
    tones: Arc<[Tone]>,
    interval: Duration,
    initial_play: bool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PersistentTones {
    pub fn new(
        bridge: Arc<dyn ConferenceBridge>,
        generator: Arc<dyn ToneGenerator>,
        tones: Vec<Tone>,
        interval: Duration,
    ) -> Self {
        generator.set_volume(DEFAULT_VOLUME);
        Self {
            bridge,
            generator,
            tones: tones.into(),
            interval,
            initial_play: true,
            timer: Mutex::new(None),
        }
    }

    pub fn with_volume(self, volume: u8) -> Self {
        self.generator.set_volume(volume);
        self
    }

    /// Wait one interval before the first play
    pub fn with_initial_play(mut self, initial_play: bool) -> Self {
        self.initial_play = initial_play;
        self
    }

    pub fn is_active(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::invalid_state("tones can only be started from within a tokio runtime"))?;
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Ok(());
        }
        if !self.generator.is_active() {
            self.generator.start()?;
            if let Some(slot) = self.generator.slot() {
                self.bridge.connect_slots(slot, 0)?;
            }
        }

        let generator = self.generator.clone();
        let tones = self.tones.clone();
        let period = self.interval;
        let first = if self.initial_play { Instant::now() } else { Instant::now() + period };
        *timer = Some(runtime.spawn(async move {
            let mut ticker = interval_at(first, period.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                // Playback failures only skip this round
                if let Err(e) = generator.play_tones(&tones) {
                    warn!("Failed to play tones: {}", e);
                }
            }
        }));
        debug!("Persistent tones started (interval {:?})", self.interval);
        Ok(())
    }

    pub fn stop(&self) {
        let Some(timer) = self.timer.lock().take() else {
            return;
        };
        timer.abort();
        if self.generator.is_active() {
            if let Err(e) = self.generator.stop() {
                warn!("Failed to stop tone generator: {}", e);
            }
        }
        debug!("Persistent tones stopped");
    }
}

impl Drop for PersistentTones {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}
