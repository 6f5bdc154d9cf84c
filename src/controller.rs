//! The screensaver/idle-power controller.
//!
//! One controller instance is constructed at process start and owns all
//! runtime state. A single background task runs the adaptive polling loop
//! and selects over settings changes, sensor readings, foreground
//! transitions and the idle timer; sensor readings and user interactions
//! arrive from arbitrary tasks. Every visibility and dark-state transition
//! happens under one mutex, so the last writer wins and show/hide calls
//! never interleave.

use crate::config::{ScreensaverSettings, SettingsFeed};
use crate::display::DisplayActuator;
use crate::lifecycle::ForegroundGate;
use crate::screensaver::ScreensaverActuator;
use crate::sensor::{SensorEvent, SensorFusion, SensorSource};
use crate::wakelock::WakeLock;

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lux threshold below which the dark-off path engages.
///
/// A single boundary with no dead-band: a reading oscillating across it
/// will toggle the display on every crossing.
pub const DARK_THRESHOLD_LUX: f32 = 2.0;

/// Longest sleep between idle re-checks.
const POLL_MAX: Duration = Duration::from_secs(5);

/// Shortest sleep, bounding how late past the timeout a show can land.
const POLL_MIN: Duration = Duration::from_millis(500);

/// Hard expiry on the dark-transition wake lock.
const WAKE_LOCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Capacity of the sensor event channel.
const EVENT_QUEUE: usize = 32;

/// Runtime state, owned exclusively by the controller and only touched
/// under its mutex.
struct ControllerState {
    settings: ScreensaverSettings,
    last_interaction: Instant,
    screensaver_visible: bool,
    current_content: String,
    screen_darkened: bool,
    foreground: bool,
    was_enabled: bool,
    gate_was_satisfied: bool,
}

struct Inner {
    display: Arc<dyn DisplayActuator>,
    screensaver: Arc<dyn ScreensaverActuator>,
    wake_lock: Arc<dyn WakeLock>,
    source: Arc<dyn SensorSource>,
    gate: ForegroundGate,
    state: Mutex<ControllerState>,
    started: AtomicBool,
    cancel: std::sync::Mutex<CancellationToken>,
}

/// The idle controller. Cloning shares the same instance.
#[derive(Clone)]
pub struct IdleController {
    inner: Arc<Inner>,
}

impl IdleController {
    pub fn new(
        display: Arc<dyn DisplayActuator>,
        screensaver: Arc<dyn ScreensaverActuator>,
        wake_lock: Arc<dyn WakeLock>,
        source: Arc<dyn SensorSource>,
        gate: ForegroundGate,
    ) -> Self {
        let foreground = gate.is_foreground();
        Self {
            inner: Arc::new(Inner {
                display,
                screensaver,
                wake_lock,
                source,
                gate,
                state: Mutex::new(ControllerState {
                    settings: ScreensaverSettings::default(),
                    last_interaction: Instant::now(),
                    screensaver_visible: false,
                    current_content: String::new(),
                    screen_darkened: false,
                    foreground,
                    was_enabled: false,
                    gate_was_satisfied: true,
                }),
                started: AtomicBool::new(false),
                cancel: std::sync::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Start the control loop. Idempotent: a second call while already
    /// started is a no-op.
    pub fn start(&self, feed: &SettingsFeed) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("Controller already started");
            return Ok(());
        }

        // The feed always carries a snapshot, so the loop never runs with
        // unknown settings.
        let settings_rx = feed.subscribe();

        let token = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = token.clone();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_loop(inner, settings_rx, token).await;
        });

        info!("Idle controller started");
        Ok(())
    }

    /// Stop the control loop, stop sensors, hide the screensaver and
    /// release any held wake lock. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Idle controller stopping");
        self.inner.cancel.lock().unwrap().cancel();
        self.inner.teardown().await;
    }

    /// Record user/system activity. Hides the screensaver if it is
    /// currently visible; the flag is cleared before this returns.
    pub async fn on_user_interaction(&self) {
        let mut st = self.inner.state.lock().await;
        self.inner.interaction_locked(&mut st).await;
    }

    /// Whether the screensaver surface is currently shown.
    pub async fn is_screensaver_visible(&self) -> bool {
        self.inner.state.lock().await.screensaver_visible
    }

    /// Whether the display was turned off by the dark-sensor path.
    pub async fn is_screen_darkened(&self) -> bool {
        self.inner.state.lock().await.screen_darkened
    }
}

/// The event loop: apply the starting snapshot, then react to whichever
/// input fires first, re-computing the poll delay every turn.
async fn run_loop(
    inner: Arc<Inner>,
    mut settings_rx: watch::Receiver<ScreensaverSettings>,
    cancel: CancellationToken,
) {
    let (event_tx, mut events) = mpsc::channel(EVENT_QUEUE);
    let mut fusion = SensorFusion::new(inner.source.clone(), event_tx);
    let mut foreground_rx = inner.gate.subscribe();
    let mut settings_live = true;

    {
        let mut st = inner.state.lock().await;
        st.foreground = *foreground_rx.borrow_and_update();
    }

    let initial = settings_rx.borrow_and_update().clone();
    inner.apply_settings(initial, &mut fusion).await;

    loop {
        let delay = inner.next_delay().await;

        tokio::select! {
            () = cancel.cancelled() => break,

            changed = settings_rx.changed(), if settings_live => match changed {
                Ok(()) => {
                    let snapshot = settings_rx.borrow_and_update().clone();
                    inner.apply_settings(snapshot, &mut fusion).await;
                }
                Err(_) => {
                    // Keep running on the last-known-good snapshot.
                    warn!("Settings feed closed, continuing with last snapshot");
                    settings_live = false;
                }
            },

            changed = foreground_rx.changed() => {
                if changed.is_ok() {
                    let foreground = *foreground_rx.borrow_and_update();
                    inner.handle_foreground(foreground).await;
                }
            }

            Some(event) = events.recv() => match event {
                SensorEvent::Light(lux) => inner.handle_light(lux).await,
                SensorEvent::Proximity { distance, max_range } => {
                    inner.handle_motion(distance, max_range).await;
                }
            },

            () = tokio::time::sleep(delay) => {
                let mut st = inner.state.lock().await;
                inner.try_show_locked(&mut st).await;
            }
        }
    }

    fusion.stop_all();
    inner.teardown().await;
    debug!("Controller loop exited");
}

/// Sleep until the next show check is due: near-immediate once the timeout
/// is close, relaxed otherwise.
fn show_poll_delay(remaining: Duration) -> Duration {
    remaining.clamp(POLL_MIN, POLL_MAX)
}

impl Inner {
    async fn next_delay(&self) -> Duration {
        let st = self.state.lock().await;

        let gated_off = !st.settings.enabled
            || (st.settings.background_pause_enabled && !st.foreground)
            || !st.settings.gate_satisfied();
        if gated_off || st.screensaver_visible {
            return POLL_MAX;
        }

        let timeout = Duration::from_secs(st.settings.timeout_seconds);
        show_poll_delay(timeout.saturating_sub(st.last_interaction.elapsed()))
    }

    /// Apply a new settings snapshot.
    async fn apply_settings(&self, new: ScreensaverSettings, fusion: &mut SensorFusion) {
        let mut st = self.state.lock().await;
        debug!(
            "Settings applied (enabled={}, timeout={}s)",
            new.enabled, new.timeout_seconds
        );
        st.settings = new.clone();

        if !new.enabled {
            self.hide_locked(&mut st).await;
            fusion.stop_all();
            st.was_enabled = false;
            st.gate_was_satisfied = new.gate_satisfied();
            return;
        }

        let gate_ok = new.gate_satisfied();
        if !gate_ok {
            self.hide_locked(&mut st).await;
        } else if !st.gate_was_satisfied {
            // Gate just opened: restart the idle clock instead of firing on
            // stale idle time.
            st.last_interaction = Instant::now();
        }
        st.gate_was_satisfied = gate_ok;

        if !st.was_enabled {
            st.last_interaction = Instant::now();
            st.was_enabled = true;
        }

        fusion.reconcile(new.dark_off_enabled, new.motion_on_enabled);

        let url = new.effective_url().to_string();
        if url.is_empty() {
            self.hide_locked(&mut st).await;
        } else if st.screensaver_visible && st.current_content != url {
            match self.screensaver.update_content(&url).await {
                Ok(()) => st.current_content = url,
                Err(e) => warn!("Screensaver content update failed: {}", e),
            }
        }
    }

    /// Show the screensaver when every precondition holds.
    async fn try_show_locked(&self, st: &mut MutexGuard<'_, ControllerState>) {
        // A show queued behind stop() must not resurrect a torn-down surface.
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        if !st.settings.enabled {
            return;
        }
        if st.settings.background_pause_enabled && !st.foreground {
            return;
        }
        if !st.settings.gate_satisfied() {
            return;
        }
        let url = st.settings.effective_url().to_string();
        if url.is_empty() {
            return;
        }
        if st.screensaver_visible {
            return;
        }
        if st.last_interaction.elapsed() < Duration::from_secs(st.settings.timeout_seconds) {
            return;
        }
        if !self.display.is_interactive() {
            return;
        }

        match self.screensaver.show(&url).await {
            Ok(()) => {
                st.screensaver_visible = true;
                st.current_content = url;
                debug!("Screensaver shown");
            }
            // Not retried here: the next tick re-evaluates the decision.
            Err(e) => warn!("Screensaver show failed: {}", e),
        }
    }

    async fn hide_locked(&self, st: &mut MutexGuard<'_, ControllerState>) {
        if !st.screensaver_visible {
            return;
        }
        st.screensaver_visible = false;
        match self.screensaver.hide().await {
            Ok(()) => debug!("Screensaver hidden"),
            Err(e) => warn!("Screensaver hide failed: {}", e),
        }
    }

    async fn interaction_locked(&self, st: &mut MutexGuard<'_, ControllerState>) {
        st.last_interaction = Instant::now();
        if st.screensaver_visible {
            self.hide_locked(st).await;
        }
    }

    /// Light reading: a bare threshold, no hysteresis.
    async fn handle_light(&self, lux: f32) {
        let mut st = self.state.lock().await;
        if !st.settings.dark_off_enabled {
            return;
        }

        let interactive = self.display.is_interactive();

        if lux < DARK_THRESHOLD_LUX && interactive && !st.screen_darkened {
            debug!("Dark detected (lux={}), turning display off", lux);
            if st.screensaver_visible {
                if let Err(e) = self.screensaver.pause().await {
                    warn!("Screensaver pause failed: {}", e);
                }
            }
            self.wake_lock.acquire(WAKE_LOCK_TIMEOUT).await;
            self.display.turn_off().await;
            st.screen_darkened = true;
        } else if lux >= DARK_THRESHOLD_LUX && st.screen_darkened {
            debug!("Light restored (lux={}), turning display on", lux);
            self.display.turn_on().await;
            if st.screensaver_visible {
                if let Err(e) = self.screensaver.resume().await {
                    warn!("Screensaver resume failed: {}", e);
                }
            }
            self.wake_lock.release().await;
            st.screen_darkened = false;

            // The dark interval counts as idle time: re-show right away if
            // the timeout has already elapsed.
            self.try_show_locked(&mut st).await;
        }
    }

    /// Proximity reading: anything nearer than the sensor's maximum range
    /// wakes the display and counts as interaction.
    async fn handle_motion(&self, distance: f32, max_range: f32) {
        let mut st = self.state.lock().await;
        if !st.settings.motion_on_enabled {
            return;
        }
        if st.settings.background_pause_enabled && !st.foreground {
            return;
        }

        if distance < max_range {
            debug!("Motion detected (distance={}), waking display", distance);
            self.display.turn_on().await;
            self.interaction_locked(&mut st).await;
        }
    }

    async fn handle_foreground(&self, foreground: bool) {
        let mut st = self.state.lock().await;
        st.foreground = foreground;

        if !st.settings.background_pause_enabled {
            return;
        }
        if foreground {
            st.last_interaction = Instant::now();
        } else {
            self.hide_locked(&mut st).await;
        }
    }

    async fn teardown(&self) {
        let mut st = self.state.lock().await;
        self.hide_locked(&mut st).await;
        self.wake_lock.release().await;
        st.screen_darkened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screensaver::ViewerError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;
    use tokio::task::yield_now;

    #[derive(Default)]
    struct MockScreensaver {
        calls: StdMutex<Vec<String>>,
    }

    impl MockScreensaver {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl ScreensaverActuator for MockScreensaver {
        async fn show(&self, content: &str) -> Result<(), ViewerError> {
            self.record(format!("show:{content}"));
            Ok(())
        }

        async fn update_content(&self, content: &str) -> Result<(), ViewerError> {
            self.record(format!("update:{content}"));
            Ok(())
        }

        async fn hide(&self) -> Result<(), ViewerError> {
            self.record("hide");
            Ok(())
        }

        async fn pause(&self) -> Result<(), ViewerError> {
            self.record("pause");
            Ok(())
        }

        async fn resume(&self) -> Result<(), ViewerError> {
            self.record("resume");
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockDisplay {
        interactive: AtomicBool,
        on_calls: AtomicU32,
        off_calls: AtomicU32,
    }

    impl MockDisplay {
        fn new(interactive: bool) -> Arc<Self> {
            let display = Self::default();
            display.interactive.store(interactive, Ordering::SeqCst);
            Arc::new(display)
        }
    }

    #[async_trait]
    impl DisplayActuator for MockDisplay {
        async fn turn_on(&self) -> bool {
            self.on_calls.fetch_add(1, Ordering::SeqCst);
            self.interactive.store(true, Ordering::SeqCst);
            true
        }

        async fn turn_off(&self) -> bool {
            self.off_calls.fetch_add(1, Ordering::SeqCst);
            self.interactive.store(false, Ordering::SeqCst);
            true
        }

        fn is_interactive(&self) -> bool {
            self.interactive.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MockWakeLock {
        held: AtomicBool,
        acquires: AtomicU32,
        releases: AtomicU32,
    }

    #[async_trait]
    impl WakeLock for MockWakeLock {
        async fn acquire(&self, _timeout: Duration) {
            if !self.held.swap(true, Ordering::SeqCst) {
                self.acquires.fetch_add(1, Ordering::SeqCst);
            }
        }

        async fn release(&self) {
            if self.held.swap(false, Ordering::SeqCst) {
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_held(&self) -> bool {
            self.held.load(Ordering::SeqCst)
        }
    }

    struct FakeSensors {
        light_tx: watch::Sender<f32>,
        proximity_tx: watch::Sender<f32>,
        started: AtomicBool,
        stops: AtomicU32,
    }

    impl FakeSensors {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                light_tx: watch::channel(0.0).0,
                proximity_tx: watch::channel(10.0).0,
                started: AtomicBool::new(false),
                stops: AtomicU32::new(0),
            })
        }
    }

    impl SensorSource for FakeSensors {
        fn light_available(&self) -> bool {
            true
        }

        fn proximity_available(&self) -> bool {
            true
        }

        fn proximity_max_range(&self) -> f32 {
            5.0
        }

        fn start(&self) {
            self.started.store(true, Ordering::SeqCst);
        }

        fn stop(&self) {
            if self.started.swap(false, Ordering::SeqCst) {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn light(&self) -> watch::Receiver<f32> {
            self.light_tx.subscribe()
        }

        fn proximity(&self) -> watch::Receiver<f32> {
            self.proximity_tx.subscribe()
        }
    }

    struct Harness {
        controller: IdleController,
        feed: SettingsFeed,
        display: Arc<MockDisplay>,
        screensaver: Arc<MockScreensaver>,
        wake_lock: Arc<MockWakeLock>,
        sensors: Arc<FakeSensors>,
        gate: ForegroundGate,
    }

    fn base_settings() -> ScreensaverSettings {
        ScreensaverSettings {
            enabled: true,
            screensaver_url: "https://example.net/clock.html".to_string(),
            timeout_seconds: 10,
            ..Default::default()
        }
    }

    fn start_harness(settings: ScreensaverSettings) -> Harness {
        let display = MockDisplay::new(true);
        let screensaver = Arc::new(MockScreensaver::default());
        let wake_lock = Arc::new(MockWakeLock::default());
        let sensors = FakeSensors::new();
        let gate = ForegroundGate::new();
        gate.surface_started();

        let controller = IdleController::new(
            display.clone(),
            screensaver.clone(),
            wake_lock.clone(),
            sensors.clone(),
            gate.clone(),
        );

        let feed = SettingsFeed::new(settings);
        controller.start(&feed).unwrap();

        Harness {
            controller,
            feed,
            display,
            screensaver,
            wake_lock,
            sensors,
            gate,
        }
    }

    /// Let spawned tasks and forwarders run.
    async fn settle() {
        for _ in 0..10 {
            yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..10 {
            yield_now().await;
        }
    }

    #[test]
    fn test_poll_delay_bounds_and_monotonic() {
        let samples = [20_000u64, 6_000, 5_000, 4_500, 3_000, 1_000, 500, 100, 0];
        let mut previous = None;

        for &remaining_ms in &samples {
            let delay = show_poll_delay(Duration::from_millis(remaining_ms));
            assert!(delay >= POLL_MIN, "delay below floor for {remaining_ms}ms");
            assert!(delay <= POLL_MAX, "delay above ceiling for {remaining_ms}ms");
            if let Some(prev) = previous {
                assert!(delay <= prev, "delay not decreasing at {remaining_ms}ms");
            }
            previous = Some(delay);
        }

        // Strictly decreasing inside the near-term window.
        assert!(
            show_poll_delay(Duration::from_millis(3000))
                < show_poll_delay(Duration::from_millis(4000))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shows_within_one_poll_of_timeout() {
        let h = start_harness(base_settings());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        // Timeout at 10s; worst case one more 500ms-5s poll.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.controller.is_screensaver_visible().await);
        assert_eq!(
            h.screensaver.calls(),
            vec!["show:https://example.net/clock.html"]
        );

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_hides_immediately_and_resets_timer() {
        let h = start_harness(base_settings());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.on_user_interaction().await;
        // Observable before any later tick runs.
        assert!(!h.controller.is_screensaver_visible().await);
        assert!(h.screensaver.calls().contains(&"hide".to_string()));

        // Idle clock restarted: well within the new timeout nothing shows.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_never_shows() {
        let h = start_harness(ScreensaverSettings {
            enabled: false,
            ..base_settings()
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.controller.is_screensaver_visible().await);
        assert!(h.screensaver.calls().is_empty());

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_url_never_shows() {
        let h = start_harness(ScreensaverSettings {
            screensaver_url: String::new(),
            ..base_settings()
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_blocked_while_display_off() {
        let h = start_harness(base_settings());
        h.display.interactive.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_blocks_show_and_flip_restarts_idle_clock() {
        let h = start_harness(ScreensaverSettings {
            gate_enabled: true,
            gate_visible: false,
            ..base_settings()
        });

        // Idle far past the timeout; the gate still wins.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        // Gate opens: the idle clock restarts now, not at the last real
        // interaction.
        h.feed.publish(ScreensaverSettings {
            gate_enabled: true,
            gate_visible: true,
            ..base_settings()
        });
        settle().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_hides_and_stops_sensors() {
        let h = start_harness(ScreensaverSettings {
            dark_off_enabled: true,
            ..base_settings()
        });
        settle().await;
        assert!(h.sensors.started.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.feed.publish(ScreensaverSettings {
            enabled: false,
            dark_off_enabled: true,
            ..base_settings()
        });
        settle().await;

        assert!(!h.controller.is_screensaver_visible().await);
        assert_eq!(h.sensors.stops.load(Ordering::SeqCst), 1);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenable_restarts_idle_clock() {
        let h = start_harness(base_settings());

        h.feed.publish(ScreensaverSettings {
            enabled: false,
            ..base_settings()
        });
        settle().await;

        tokio::time::sleep(Duration::from_secs(60)).await;

        h.feed.publish(base_settings());
        settle().await;

        // The 60 idle seconds while disabled must not count.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_light_sequence_yields_single_toggle_pair() {
        let h = start_harness(ScreensaverSettings {
            dark_off_enabled: true,
            timeout_seconds: 3600,
            ..base_settings()
        });
        settle().await;

        for lux in [5.0, 1.0, 1.0, 3.0] {
            h.sensors.light_tx.send_replace(lux);
            settle().await;
        }

        assert_eq!(h.display.off_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.wake_lock.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(h.display.on_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.wake_lock.releases.load(Ordering::SeqCst), 1);
        assert!(!h.wake_lock.is_held());
        assert!(!h.controller.is_screen_darkened().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dark_pauses_visible_screensaver_and_resumes() {
        let h = start_harness(ScreensaverSettings {
            dark_off_enabled: true,
            ..base_settings()
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.sensors.light_tx.send_replace(0.5);
        settle().await;
        assert!(h.controller.is_screen_darkened().await);
        assert!(h.wake_lock.is_held());
        assert!(h.screensaver.calls().contains(&"pause".to_string()));
        // Still logically visible through the dark interval.
        assert!(h.controller.is_screensaver_visible().await);

        h.sensors.light_tx.send_replace(4.0);
        settle().await;
        assert!(!h.controller.is_screen_darkened().await);
        assert!(!h.wake_lock.is_held());
        assert!(h.screensaver.calls().contains(&"resume".to_string()));

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dark_interval_counts_as_idle_for_reshow() {
        let h = start_harness(ScreensaverSettings {
            dark_off_enabled: true,
            ..base_settings()
        });
        settle().await;

        // Dark before the screensaver ever showed; the display goes off, so
        // the poll loop cannot show.
        h.sensors.light_tx.send_replace(0.5);
        settle().await;
        assert!(!h.controller.is_screensaver_visible().await);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        // Light restored after more than the timeout: immediate re-show,
        // not a wait for the next poll.
        h.sensors.light_tx.send_replace(4.0);
        settle().await;
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_wakes_display_and_counts_as_interaction() {
        let h = start_harness(ScreensaverSettings {
            motion_on_enabled: true,
            ..base_settings()
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);
        let on_before = h.display.on_calls.load(Ordering::SeqCst);

        // Nothing near: max-range reading is ignored.
        h.sensors.proximity_tx.send_replace(5.0);
        settle().await;
        assert!(h.controller.is_screensaver_visible().await);

        h.sensors.proximity_tx.send_replace(2.0);
        settle().await;
        assert!(!h.controller.is_screensaver_visible().await);
        assert_eq!(h.display.on_calls.load(Ordering::SeqCst), on_before + 1);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_ignored_while_backgrounded() {
        let h = start_harness(ScreensaverSettings {
            motion_on_enabled: true,
            background_pause_enabled: true,
            ..base_settings()
        });
        settle().await;

        h.gate.surface_stopped();
        settle().await;

        h.sensors.proximity_tx.send_replace(1.0);
        settle().await;
        assert_eq!(h.display.on_calls.load(Ordering::SeqCst), 0);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_hides_and_foreground_restarts_clock() {
        let h = start_harness(ScreensaverSettings {
            background_pause_enabled: true,
            ..base_settings()
        });

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.gate.surface_stopped();
        settle().await;
        assert!(!h.controller.is_screensaver_visible().await);

        h.gate.surface_started();
        settle().await;

        // The interaction clock restarted on re-foreground; no instant
        // reappearance.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.controller.is_screensaver_visible().await);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_change_updates_live_surface() {
        let h = start_harness(base_settings());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);

        h.feed.publish(ScreensaverSettings {
            screensaver_url: "https://example.net/photos.html".to_string(),
            ..base_settings()
        });
        settle().await;

        let calls = h.screensaver.calls();
        assert!(calls.contains(&"update:https://example.net/photos.html".to_string()));
        // No hide/show cycle around the update.
        assert_eq!(calls.iter().filter(|c| c.starts_with("show:")).count(), 1);
        assert!(!calls.contains(&"hide".to_string()));
        assert!(h.controller.is_screensaver_visible().await);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let h = start_harness(base_settings());
        h.controller.start(&h.feed).unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(h.controller.is_screensaver_visible().await);
        // A duplicated loop would double the show calls.
        assert_eq!(h.screensaver.calls().len(), 1);

        h.controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_releases_wake_lock_once() {
        let h = start_harness(ScreensaverSettings {
            dark_off_enabled: true,
            ..base_settings()
        });
        settle().await;

        h.sensors.light_tx.send_replace(0.5);
        settle().await;
        assert!(h.wake_lock.is_held());

        h.controller.stop().await;
        h.controller.stop().await;
        settle().await;

        assert!(!h.wake_lock.is_held());
        assert_eq!(h.wake_lock.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(h.wake_lock.releases.load(Ordering::SeqCst), 1);
        assert!(!h.sensors.started.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_controller_never_shows() {
        let h = start_harness(base_settings());
        h.controller.stop().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!h.controller.is_screensaver_visible().await);
        assert!(h.screensaver.calls().is_empty());
    }
}
