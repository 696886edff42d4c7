//! Simulated long-running activities: goto slew, imaging exposure and
//! initialization.
//!
//! Each activity is a small state machine advanced by a ticker task that
//! posts events onto the core timeline; the timers never touch state
//! directly.  Dropping a ticker aborts it, so an activity stops the moment
//! the core forgets it.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::{Core, CoreEvent};
use crate::emitter::Target;
use crate::images::SkyPosition;
use crate::state::{TaskStage, TaskState};

const SLEW_TICK: Duration = Duration::from_millis(500);
/// Slew progress gained per tick, percent.
const SLEW_STEP: u32 = 20;
const IMAGING_TICK: Duration = Duration::from_secs(1);
const INIT_TICK: Duration = Duration::from_secs(3);
/// Focus milestone partway through initialization.
const INIT_FOCUS_POSITION: i64 = 18617;

pub(crate) const INIT_FAILURE_MESSAGE: &str = "Initialization failed. Please point the scope away from any bright lights; buildings; trees and try again.";

/// A repeating timer feeding events to the core; aborted on drop.
#[derive(Debug)]
pub(crate) struct Ticker {
    handle: JoinHandle<()>,
}

impl Ticker {
    pub(crate) fn spawn(
        period: Duration,
        events: mpsc::Sender<CoreEvent>,
        make_event: impl Fn() -> CoreEvent + Send + 'static,
    ) -> Ticker {
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if events.send(make_event()).await.is_err() {
                    break;
                }
            }
        });
        Ticker { handle }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
pub(crate) struct SlewRun {
    pub(crate) progress: u32,
    _ticker: Ticker,
}

#[derive(Debug)]
pub(crate) struct InitRun {
    pub(crate) count: u32,
    _ticker: Ticker,
}

impl Core {
    // -- slew --

    pub(crate) fn start_slew(&mut self) {
        let ticker = Ticker::spawn(SLEW_TICK, self.events.clone(), || CoreEvent::SlewTick);
        self.slew = Some(SlewRun {
            progress: 0,
            _ticker: ticker,
        });
    }

    pub(crate) fn stop_slew(&mut self) {
        self.slew = None;
    }

    pub(crate) fn on_slew_tick(&mut self) {
        let progress = match self.slew.as_mut() {
            Some(run) => {
                run.progress += SLEW_STEP;
                run.progress
            }
            None => return,
        };
        if progress < 100 {
            return;
        }
        self.slew = None;

        self.state.ra = crate::astro::normalize_ra(self.state.target_ra);
        self.state.dec = crate::astro::clamp_dec(self.state.target_dec);
        self.state.set_slewing(false);
        self.state.sync_tracking(self.clock.now_ms());
        info!(ra = self.state.ra, dec = self.state.dec, "slew complete");

        self.send_mount_status_unadvanced(Target::Broadcast);
        self.schedule(Duration::from_millis(100), CoreEvent::SlewImageRequest);
    }

    pub(crate) fn on_slew_image_request(&mut self) {
        let position = SkyPosition {
            ra_deg: self.state.target_ra.to_degrees(),
            dec_deg: self.state.target_dec.to_degrees(),
            name: "Slew_Target".to_owned(),
            description: "Position after telescope slew".to_owned(),
        };
        self.request_sky_image(position);
    }

    // -- imaging --

    pub(crate) fn start_imaging(&mut self) {
        let ticker = Ticker::spawn(IMAGING_TICK, self.events.clone(), || CoreEvent::ImagingTick);
        self.imaging = Some(ticker);
    }

    pub(crate) fn on_imaging_tick(&mut self) {
        if self.imaging.is_none() {
            return;
        }
        self.state.imaging_time_left -= 1;
        self.send_new_image_ready(Target::Broadcast);
        if self.state.imaging_time_left <= 0 {
            self.state.is_imaging = false;
            self.imaging = None;
            info!("imaging complete");
        }
    }

    // -- initialization --

    pub(crate) fn start_initialization(&mut self, fake: bool) {
        if fake {
            // Fake initializations skip the ticker and resolve after 1 s.
            self.init = None;
            self.schedule(Duration::from_secs(1), CoreEvent::InitComplete);
            return;
        }
        let ticker = Ticker::spawn(INIT_TICK, self.events.clone(), || CoreEvent::InitTick);
        self.init = Some(InitRun {
            count: 0,
            _ticker: ticker,
        });
    }

    pub(crate) fn on_init_tick(&mut self) {
        let count = match self.init.as_mut() {
            Some(run) => {
                run.count += 1;
                run.count
            }
            None => return,
        };

        self.send_task_status(Target::Broadcast);

        if count == 5 {
            self.state.init_info.position_of_focus = INIT_FOCUS_POSITION;
        }
        if count == 10 {
            self.state.init_info.num_points = 1;
            self.state.init_info.num_points_remaining = 1;
            self.state.init_info.percent_complete = 50;
        }

        let roll: u8 = self.rng.gen_range(0..100);
        if count < 10 && roll < self.cfg.init_failure_percent {
            self.fail_initialization();
            return;
        }

        if count >= 15 {
            self.state.init_info.num_points = 2;
            self.state.init_info.num_points_remaining = 0;
            self.state.init_info.percent_complete = 100;
            self.complete_initialization();
        }
    }

    pub(crate) fn complete_initialization(&mut self) {
        self.init = None;
        self.state.is_initializing = false;
        self.state.stage = TaskStage::Complete;
        self.state.is_ready = true;
        info!("initialization complete");

        self.send_task_status(Target::Broadcast);
        self.schedule(Duration::from_secs(1), CoreEvent::InitIdle);
    }

    pub(crate) fn on_init_idle(&mut self) {
        self.state.task_state = TaskState::Idle;
        self.send_task_status(Target::Broadcast);
    }

    pub(crate) fn fail_initialization(&mut self) {
        self.init = None;
        self.state.is_initializing = false;
        self.state.stage = TaskStage::Stopped;
        self.state.is_ready = false;
        info!("initialization failed");

        let value = serde_json::json!({
            "Command": "Error",
            "Destination": "All",
            "ErrorCode": -78,
            "ErrorMessage": INIT_FAILURE_MESSAGE,
            "ExpiredAt": self.clock.expired_at(),
            "Type": "Notification",
        });
        self.broadcast_value(&value);
        self.send_task_status(Target::Broadcast);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{attach_client, core_fixture, drain_json};

    #[tokio::test]
    async fn slew_completes_after_five_ticks() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);
        core.state.is_aligned = true;
        core.state.target_ra = 1.25;
        core.state.target_dec = -0.5;
        core.state.set_slewing(true);
        core.start_slew();

        for _ in 0..4 {
            core.on_slew_tick();
            assert!(core.state.is_slewing);
            assert!(core.slew.is_some());
        }
        core.on_slew_tick();

        assert!(!core.state.is_slewing);
        assert!(core.state.is_goto_over);
        assert!(core.slew.is_none());
        assert!((core.state.ra - 1.25).abs() < 1e-12);
        assert!((core.state.dec + 0.5).abs() < 1e-12);

        let seen = drain_json(&mut rx);
        let mount = seen.last().unwrap();
        assert_eq!(mount["Source"], "Mount");
        assert_eq!(mount["IsGotoOver"], true);
    }

    #[tokio::test]
    async fn slew_completion_requests_a_sky_image() {
        let (mut core, mut events) = core_fixture();
        let _rx = attach_client(&mut core, 1);
        core.state.target_ra = 1.0;
        core.state.target_dec = 0.1;
        core.start_slew();
        for _ in 0..5 {
            core.on_slew_tick();
        }

        // 100 ms later the image request lands on the core timeline.
        let event = tokio::time::timeout(Duration::from_millis(500), events.recv())
            .await
            .expect("image request should be scheduled")
            .expect("core events channel open");
        assert!(matches!(event, CoreEvent::SlewImageRequest));
    }

    #[tokio::test]
    async fn imaging_counts_down_and_notifies_each_second() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);
        core.state.is_imaging = true;
        core.state.imaging_time_left = 3;
        core.start_imaging();

        core.on_imaging_tick();
        core.on_imaging_tick();
        assert!(core.state.is_imaging);
        core.on_imaging_tick();
        assert!(!core.state.is_imaging);
        assert!(core.imaging.is_none());

        let seen = drain_json(&mut rx);
        let image_ready: Vec<_> = seen
            .iter()
            .filter(|v| v["Command"] == "NewImageReady")
            .collect();
        assert_eq!(image_ready.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_imaging_keeps_ticking_until_time_runs_out() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);
        core.state.is_imaging = true;
        core.state.imaging_time_left = 2;
        core.start_imaging();

        core.state.is_imaging = false; // CancelImaging clears only the flag
        core.on_imaging_tick();
        assert!(core.imaging.is_some(), "ticker survives a cancel");
        core.on_imaging_tick();
        assert!(core.imaging.is_none());
        assert_eq!(drain_json(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn initialization_hits_the_milestones_and_completes() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);
        core.cfg.init_failure_percent = 0;
        core.state.task_state = TaskState::Initialized;
        core.start_initialization(false);

        for _ in 0..4 {
            core.on_init_tick();
        }
        assert_eq!(core.state.init_info.position_of_focus, -1);
        core.on_init_tick(); // count = 5
        assert_eq!(core.state.init_info.position_of_focus, INIT_FOCUS_POSITION);

        for _ in 0..5 {
            core.on_init_tick();
        }
        assert_eq!(core.state.init_info.num_points, 1);
        assert_eq!(core.state.init_info.percent_complete, 50);

        for _ in 0..5 {
            core.on_init_tick();
        }
        assert_eq!(core.state.init_info.num_points, 2);
        assert_eq!(core.state.init_info.percent_complete, 100);
        assert_eq!(core.state.stage, TaskStage::Complete);
        assert!(core.state.is_ready);
        assert!(core.init.is_none());

        core.on_init_idle();
        assert_eq!(core.state.task_state, TaskState::Idle);
        assert!(!drain_json(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn initialization_failure_broadcasts_the_error() {
        let (mut core, _events) = core_fixture();
        let mut rx = attach_client(&mut core, 1);
        core.cfg.init_failure_percent = 100; // fail on the first draw
        core.start_initialization(false);

        core.on_init_tick();
        assert_eq!(core.state.stage, TaskStage::Stopped);
        assert!(!core.state.is_ready);
        assert!(core.init.is_none());

        let seen = drain_json(&mut rx);
        let error = seen
            .iter()
            .find(|v| v["Command"] == "Error")
            .expect("error notification expected");
        assert_eq!(error["ErrorCode"], -78);
        assert!(error["ErrorMessage"]
            .as_str()
            .unwrap()
            .contains("bright lights"));
        assert_eq!(error["Type"], "Notification");
    }

    #[tokio::test]
    async fn fake_initialization_schedules_completion_without_a_ticker() {
        let (mut core, mut events) = core_fixture();
        let _rx = attach_client(&mut core, 1);
        core.start_initialization(true);
        assert!(core.init.is_none());

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("completion should be scheduled")
            .expect("core events channel open");
        assert!(matches!(event, CoreEvent::InitComplete));
    }
}
