use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, TryRecvError};
use eframe::egui;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{
    animator::{LoudnessMeter, MouthAnimator},
    audio::MicrophoneInput,
    config::AnimatorConfig,
    events::RawEvent,
    hud::EguiSurface,
    presentation::{HudSurface, PresentationDriver},
    reconciler::{EventReconciler, UiIntent},
    store::StateStore,
    transport::{ConnectionState, ConnectionStatus, TransportChannel},
};

/// Upper bound on events handled per pump so a burst cannot stall a frame.
const MAX_EVENTS_PER_PUMP: usize = 256;

/// Event loop body shared by the overlay window and the headless runner.
pub struct HudRuntime<S: HudSurface> {
    events: Receiver<RawEvent>,
    reconciler: EventReconciler,
    driver: PresentationDriver<S>,
    store: StateStore,
    connection: Option<watch::Receiver<ConnectionState>>,
    last_status: Option<ConnectionStatus>,
}

impl<S: HudSurface> HudRuntime<S> {
    pub fn new(
        events: Receiver<RawEvent>,
        reconciler: EventReconciler,
        driver: PresentationDriver<S>,
        store: StateStore,
    ) -> Self {
        Self {
            events,
            reconciler,
            driver,
            store,
            connection: None,
            last_status: None,
        }
    }

    pub fn with_connection(mut self, connection: watch::Receiver<ConnectionState>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn surface_mut(&mut self) -> &mut S {
        self.driver.surface_mut()
    }

    #[cfg(test)]
    pub fn driver(&self) -> &PresentationDriver<S> {
        &self.driver
    }

    /// Seeds the HUD from the persisted snapshot so the first frame is not blank.
    pub fn restore(&mut self, now: Instant) {
        match self.store.load(Utc::now()) {
            Some(snapshot) => {
                info!(path = %self.store.path().display(), "restored hud state");
                self.reconciler.seed(snapshot);
                self.driver.render_full(self.reconciler.snapshot(), now);
            }
            None => debug!("no persisted hud state"),
        }
    }

    /// Drains queued events, advances timers and refreshes the connection
    /// indicator. Returns how many events were handled.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while handled < MAX_EVENTS_PER_PUMP {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            self.handle(event, now);
            handled += 1;
        }
        self.driver.tick(now);
        self.refresh_connection();
        handled
    }

    fn handle(&mut self, event: RawEvent, now: Instant) {
        trace!(kind = event.kind(), "event");
        let intents = self.reconciler.handle(event, Utc::now());
        let persist = intents.iter().any(|intent| matches!(intent, UiIntent::Persist));
        for intent in intents {
            self.driver.apply(intent, self.reconciler.snapshot(), now);
        }
        if persist {
            if let Err(err) = self.store.save(self.reconciler.snapshot(), Utc::now()) {
                warn!(?err, "failed persisting hud state");
            }
        }
    }

    fn refresh_connection(&mut self) {
        let Some(connection) = &self.connection else {
            return;
        };
        let status = connection.borrow().status;
        if self.last_status != Some(status) {
            debug!(?status, "connection status changed");
            self.last_status = Some(status);
            self.driver.render_connection(status);
        }
    }

    pub fn shutdown(&mut self) {
        self.driver.teardown();
        self.reconciler.invalidate();
    }
}

struct MouthDriver {
    input: MicrophoneInput,
    meter: LoudnessMeter,
    animator: MouthAnimator<StdRng>,
}

pub struct HudApp {
    runtime: HudRuntime<EguiSurface>,
    transport: Option<TransportChannel>,
    mouth: Option<MouthDriver>,
}

impl HudApp {
    pub fn new(
        runtime: HudRuntime<EguiSurface>,
        transport: Option<TransportChannel>,
        animator: &AnimatorConfig,
    ) -> Self {
        let mouth = if animator.enabled {
            match MicrophoneInput::start() {
                Ok(input) => Some(MouthDriver {
                    input,
                    meter: LoudnessMeter::new(),
                    animator: MouthAnimator::new(
                        animator.clone(),
                        StdRng::from_entropy(),
                        Instant::now(),
                    ),
                }),
                Err(err) => {
                    warn!(%err, "microphone unavailable; avatar animation disabled");
                    None
                }
            }
        } else {
            None
        };
        Self {
            runtime,
            transport,
            mouth,
        }
    }

    fn step_mouth(&mut self, now: Instant) {
        let Some(mouth) = self.mouth.as_mut() else {
            return;
        };
        let Some(window) = mouth.input.latest_window() else {
            return;
        };
        let volume = mouth.meter.measure(&window, mouth.input.sample_rate());
        let frame = mouth.animator.step(volume, now);
        self.runtime.surface_mut().set_mouth(frame);
    }
}

impl eframe::App for HudApp {
    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.0, 0.0, 0.0, 0.0]
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.runtime.pump(now);
        self.step_mouth(now);
        self.runtime.surface_mut().paint(ctx);
        ctx.request_repaint_after(Duration::from_millis(33));
    }
}

impl Drop for HudApp {
    fn drop(&mut self) {
        self.runtime.shutdown();
        if let Some(transport) = self.transport.as_mut() {
            transport.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::watch;

    use super::HudRuntime;
    use crate::{
        config::{HealthConfig, SpriteConfig, ToastConfig, XpConfig},
        events::RawEvent,
        presentation::{tests::RecordingSurface, PresentationDriver, Visual, Widget},
        protocol::parse_value,
        reconciler::EventReconciler,
        snapshot::PlayerSnapshot,
        sprites::{SpriteAtlas, SpriteResolver},
        store::StateStore,
        transport::{ConnectionState, ConnectionStatus},
    };

    fn runtime(
        store: StateStore,
    ) -> (
        HudRuntime<RecordingSurface>,
        crossbeam_channel::Sender<RawEvent>,
    ) {
        let sprites = Arc::new(SpriteResolver::new(
            &SpriteConfig::default(),
            SpriteAtlas::default(),
        ));
        let (tx, rx) = crossbeam_channel::unbounded();
        let reconciler = EventReconciler::new(XpConfig::default(), sprites.clone());
        let driver = PresentationDriver::new(
            RecordingSurface::default(),
            sprites,
            HealthConfig::default(),
            ToastConfig::default(),
        );
        (HudRuntime::new(rx, reconciler, driver, store), tx)
    }

    fn event(value: serde_json::Value) -> RawEvent {
        parse_value(value).expect("valid event")
    }

    #[test]
    fn state_event_renders_and_writes_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Duration::from_secs(300));
        let (mut runtime, tx) = runtime(store.clone());

        tx.send(event(json!({
            "type": "state",
            "player": {
                "health": 0.42,
                "state": { "isOutside": true },
                "stats": { "inventoryWeight": 4.0, "maxWeight": 20.0 }
            }
        })))
        .expect("send");
        assert_eq!(runtime.pump(Instant::now()), 1);

        let surface = runtime.surface_mut();
        assert_eq!(surface.texts[&Widget::HealthBar], "42%");
        assert_eq!(surface.texts[&Widget::Location], "OUTSIDE");
        assert_eq!(surface.texts[&Widget::WeightBar], "4.0 / 20.0");

        let stored = store.load(Utc::now()).expect("state persisted");
        assert_eq!(stored.health, Some(42.0));
    }

    #[test]
    fn cold_start_renders_persisted_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Duration::from_secs(300));
        let snapshot = PlayerSnapshot {
            health: Some(55.0),
            ..PlayerSnapshot::default()
        };
        store.save(&snapshot, Utc::now()).expect("save");

        let (mut runtime, _tx) = runtime(store);
        runtime.restore(Instant::now());
        assert_eq!(runtime.surface_mut().texts[&Widget::HealthBar], "55%");
    }

    #[test]
    fn toasts_and_hit_markers_flow_through_timers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Duration::from_secs(300));
        let (mut runtime, tx) = runtime(store);
        let start = Instant::now();

        tx.send(event(json!({ "type": "zombie_kill", "weapon": "none" })))
            .expect("send");
        tx.send(event(json!({ "type": "attack", "itemName": "Axe", "hit": true })))
            .expect("send");
        tx.send(event(json!({ "type": "sprite_sheet_updated", "path": "faces/new.png" })))
            .expect("send");
        assert_eq!(runtime.pump(start), 3);
        assert_eq!(runtime.driver().visible_toasts(), 1);
        assert!(runtime
            .surface_mut()
            .has(&Widget::HitMarker, Visual::Active));
        assert_eq!(runtime.surface_mut().avatar.as_deref(), Some("faces/new.png"));

        runtime.pump(start + Duration::from_millis(200));
        assert!(!runtime
            .surface_mut()
            .has(&Widget::HitMarker, Visual::Active));

        runtime.shutdown();
        assert_eq!(runtime.driver().visible_toasts(), 0);
    }

    #[test]
    fn connection_changes_update_indicator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), Duration::from_secs(300));
        let (state_tx, state_rx) = watch::channel(ConnectionState {
            status: ConnectionStatus::Connecting,
            current_backoff_delay: Duration::from_secs(1),
        });
        let (runtime, _tx) = runtime(store);
        let mut runtime = runtime.with_connection(state_rx);

        runtime.pump(Instant::now());
        assert!(runtime
            .surface_mut()
            .has(&Widget::Connection, Visual::Disconnected));

        state_tx
            .send(ConnectionState {
                status: ConnectionStatus::Open,
                current_backoff_delay: Duration::from_secs(1),
            })
            .expect("send");
        runtime.pump(Instant::now());
        assert!(!runtime
            .surface_mut()
            .has(&Widget::Connection, Visual::Disconnected));
    }
}
