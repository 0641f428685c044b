//! Looped wave file playback that can be silenced

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::audio::{ConferenceBridge, DEFAULT_VOLUME, WavePlayer, WavePlayerFactory};
use crate::core::notification::{Notification, NotificationCenter, Observer, ObserverFn};
use crate::error::{Error, Result};

const FINISHED: &str = "WaveFileDidFinishPlaying";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play,
    Reschedule,
    Stop,
}

/// One started playback loop
struct Run {
    commands: mpsc::UnboundedSender<Command>,
    active: Arc<AtomicBool>,
}

#[derive(Clone)]
struct Playback {
    center: Arc<NotificationCenter>,
    bridge: Arc<dyn ConferenceBridge>,
    factory: Arc<dyn WavePlayerFactory>,
    path: PathBuf,
    volume: u8,
    loop_count: u32,
    pause_time: Duration,
}

/// Plays a wave file `loop_count` times (0 loops forever) with
/// `pause_time` of silence between plays, and can be stopped at any time
pub struct SilenceableWaveFile {
    playback: Playback,
    initial_play: bool,
    run: Mutex<Option<Run>>,
}

impl SilenceableWaveFile {
    pub fn new(
        center: Arc<NotificationCenter>,
        bridge: Arc<dyn ConferenceBridge>,
        factory: Arc<dyn WavePlayerFactory>,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::FileNotFound(path));
        }
        Ok(Self {
            playback: Playback {
                center,
                bridge,
                factory,
                path,
                volume: DEFAULT_VOLUME,
                loop_count: 1,
                pause_time: Duration::ZERO,
            },
            initial_play: true,
            run: Mutex::new(None),
        })
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.playback.volume = volume;
        self
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.playback.loop_count = loop_count;
        self
    }

    pub fn with_pause_time(mut self, pause_time: Duration) -> Self {
        self.playback.pause_time = pause_time;
        self
    }

    pub fn with_initial_play(mut self, initial_play: bool) -> Self {
        self.initial_play = initial_play;
        self
    }

    pub fn path(&self) -> &Path {
        &self.playback.path
    }

    pub fn is_active(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|run| run.active.load(Ordering::SeqCst))
    }

    /// Start playing. Does nothing while already playing.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::invalid_state("wave files can only be started from within a tokio runtime"))?;
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|run| run.active.load(Ordering::SeqCst)) {
            return Ok(());
        }

        let (commands, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        if self.initial_play {
            let _ = commands.send(Command::Play);
        } else {
            schedule(&commands, self.playback.pause_time, Command::Play);
        }
        runtime.spawn(self.playback.clone().run(commands.clone(), receiver, active.clone()));
        *run = Some(Run { commands, active });
        debug!("Started playing {}", self.playback.path.display());
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            if run.active.load(Ordering::SeqCst) {
                let _ = run.commands.send(Command::Stop);
            }
        }
    }
}

fn schedule(commands: &mpsc::UnboundedSender<Command>, delay: Duration, command: Command) {
    let commands = commands.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = commands.send(command);
    });
}

impl Playback {
    async fn run(
        self,
        commands: mpsc::UnboundedSender<Command>,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        active: Arc<AtomicBool>,
    ) {
        let mut current: Option<(Arc<dyn WavePlayer>, Arc<dyn Observer>)> = None;
        let mut loops = 0u32;

        while let Some(command) = receiver.recv().await {
            match command {
                Command::Play => {
                    let player = match self.factory.open(&self.path) {
                        Ok(player) => player,
                        Err(e) => {
                            error!("Cannot open {}: {}", self.path.display(), e);
                            break;
                        }
                    };
                    let forward = commands.clone();
                    let observer: Arc<dyn Observer> = Arc::new(ObserverFn::new(move |_: &Notification| {
                        let _ = forward.send(Command::Reschedule);
                    }));
                    self.center
                        .add_observer(Arc::downgrade(&observer), Some(FINISHED), Some(player.sender()));
                    player.set_volume(self.volume);
                    match player.start() {
                        Ok(()) => {
                            if let Some(slot) = player.slot() {
                                if let Err(e) = self.bridge.connect_slots(slot, 0) {
                                    warn!("Cannot connect wave file to the sound device: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Cannot play {}: {}", self.path.display(), e);
                            let _ = commands.send(Command::Reschedule);
                        }
                    }
                    current = Some((player, observer));
                }
                Command::Reschedule => {
                    loops += 1;
                    if let Some((player, observer)) = current.take() {
                        self.center
                            .remove_observer(observer.as_ref(), Some(FINISHED), Some(player.sender()));
                    }
                    if self.loop_count == 0 || loops < self.loop_count {
                        schedule(&commands, self.pause_time, Command::Play);
                    } else {
                        break;
                    }
                }
                Command::Stop => {
                    if let Some((player, observer)) = current.take() {
                        self.center
                            .remove_observer(observer.as_ref(), Some(FINISHED), Some(player.sender()));
                        if let Err(e) = player.stop() {
                            warn!("Cannot stop {}: {}", self.path.display(), e);
                        }
                    }
                    break;
                }
            }
        }
        active.store(false, Ordering::SeqCst);
        debug!("Finished playing {} after {} loop(s)", self.path.display(), loops);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SlotId;
    use crate::core::notification::{NotificationKind, SenderId};

    struct Bridge;

    impl ConferenceBridge for Bridge {
        fn connect_slots(&self, _source: SlotId, _destination: SlotId) -> Result<()> {
            Ok(())
        }
    }

    struct Player {
        id: SenderId,
        stopped: AtomicBool,
        fail_start: bool,
    }

    impl WavePlayer for Player {
        fn sender(&self) -> SenderId {
            self.id
        }
        fn start(&self) -> Result<()> {
            if self.fail_start {
                Err(Error::media("device busy"))
            } else {
                Ok(())
            }
        }
        fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn slot(&self) -> Option<SlotId> {
            Some(3)
        }
        fn set_volume(&self, _volume: u8) {}
    }

    #[derive(Default)]
    struct Factory {
        opened: Mutex<Vec<Arc<Player>>>,
        fail_start: bool,
    }

    impl WavePlayerFactory for Factory {
        fn open(&self, _path: &Path) -> Result<Arc<dyn WavePlayer>> {
            let player = Arc::new(Player {
                id: SenderId::next(),
                stopped: AtomicBool::new(false),
                fail_start: self.fail_start,
            });
            self.opened.lock().push(player.clone());
            Ok(player)
        }
    }

    fn wave_path() -> PathBuf {
        let path = std::env::temp_dir().join(format!("sipsimple-wave-{}.wav", std::process::id()));
        std::fs::write(&path, b"RIFF").unwrap();
        path
    }

    fn finish(center: &NotificationCenter, player: &Player) {
        center.post_notification(player.id, NotificationKind::WaveFileDidFinishPlaying {});
    }

    #[test]
    fn missing_file_is_rejected() {
        let result = SilenceableWaveFile::new(
            Arc::new(NotificationCenter::new()),
            Arc::new(Bridge),
            Arc::new(Factory::default()),
            "/nonexistent/ring.wav",
        );
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn loops_with_pause_then_stops_by_itself() {
        let center = Arc::new(NotificationCenter::new());
        let factory = Arc::new(Factory::default());
        let wave = SilenceableWaveFile::new(center.clone(), Arc::new(Bridge), factory.clone(), wave_path())
            .unwrap()
            .with_loop_count(2)
            .with_pause_time(Duration::from_secs(1));

        wave.start().unwrap();
        assert!(wave.is_active());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.opened.lock().len(), 1);

        let first = factory.opened.lock()[0].clone();
        finish(&center, &first);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(factory.opened.lock().len(), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(factory.opened.lock().len(), 2);

        let second = factory.opened.lock()[1].clone();
        finish(&center, &second);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!wave.is_active());
        assert!(!second.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_playback() {
        let center = Arc::new(NotificationCenter::new());
        let factory = Arc::new(Factory::default());
        let wave = SilenceableWaveFile::new(center.clone(), Arc::new(Bridge), factory.clone(), wave_path())
            .unwrap()
            .with_loop_count(0);

        wave.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        wave.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!wave.is_active());
        let player = factory.opened.lock()[0].clone();
        assert!(player.stopped.load(Ordering::SeqCst));
        // The finished notification of a stopped player is no longer observed
        finish(&center, &player);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(factory.opened.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_counts_as_a_loop() {
        let center = Arc::new(NotificationCenter::new());
        let factory = Arc::new(Factory {
            fail_start: true,
            ..Default::default()
        });
        let wave = SilenceableWaveFile::new(center, Arc::new(Bridge), factory.clone(), wave_path())
            .unwrap()
            .with_loop_count(3);

        wave.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(factory.opened.lock().len(), 3);
        assert!(!wave.is_active());
    }
}
