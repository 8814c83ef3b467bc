//! Dual-mode tick scheduler.
//!
//! Exactly one callback chain is armed while running: frame-driven when the
//! page is visible and focused, timer-driven otherwise. Every transition goes
//! through [`Scheduler::transition`], which cancels the outgoing chain before
//! arming the incoming one, so the armed set never holds two chains.
//!
//! Every tick runs `simulate -> maybe_publish -> render` in that order. The
//! simulator always receives the nominal dt; real elapsed time is only used
//! for stall diagnostics.

use std::time::Duration;

use tracing::{debug, info, trace};

use crate::platform::{CallbackHandle, Platform, Visibility};

/// Frame gaps larger than this many nominal ticks are logged as stalls.
const FRAME_STALL_FACTOR: u32 = 4;

/// Receiver of scheduler ticks.
pub trait TickHandler {
    fn simulate(&mut self, dt: Duration);

    /// `now` is the host timestamp of the tick.
    fn maybe_publish(&mut self, now: Duration);

    fn render(&mut self);
}

/// Scheduler state. The running variants carry the armed callback handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Stopped,
    FrameDriven(CallbackHandle),
    TimerDriven(CallbackHandle),
}

impl SchedulerMode {
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::FrameDriven(_) => "frame-driven",
            Self::TimerDriven(_) => "timer-driven",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Delivery {
    Frame,
    Timer,
}

#[derive(Debug)]
pub struct Scheduler {
    mode: SchedulerMode,
    timer_period: Duration,
    nominal_dt: Duration,
    last_frame: Option<Duration>,
    ticks: u64,
}

impl Scheduler {
    pub fn new(timer_period: Duration, nominal_dt: Duration) -> Self {
        Self {
            mode: SchedulerMode::Stopped,
            timer_period,
            nominal_dt,
            last_frame: None,
            ticks: 0,
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// Ticks executed since construction.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Arm the chain matching `visibility`. Returns `false` if already running.
    pub fn start<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        visibility: Visibility,
    ) -> bool {
        if self.mode.is_running() {
            debug!(mode = self.mode.as_str(), "scheduler already running");
            return false;
        }
        let delivery = if visibility.is_foreground() {
            Delivery::Frame
        } else {
            Delivery::Timer
        };
        self.transition(platform, Some(delivery));
        info!(mode = self.mode.as_str(), "scheduler started");
        true
    }

    /// Cancel the armed chain. Pending callbacks fired afterwards are ignored.
    pub fn stop<P: Platform + ?Sized>(&mut self, platform: &mut P) {
        if !self.mode.is_running() {
            return;
        }
        self.transition(platform, None);
        info!("scheduler stopped");
    }

    /// React to a visibility or focus change.
    ///
    /// Frame delivery is only restored while the session is active.
    pub fn on_visibility<P: Platform + ?Sized>(
        &mut self,
        platform: &mut P,
        visibility: Visibility,
        session_active: bool,
    ) {
        match self.mode {
            SchedulerMode::FrameDriven(_) if !visibility.is_foreground() => {
                self.transition(platform, Some(Delivery::Timer));
                info!(
                    visible = visibility.visible,
                    focused = visibility.focused,
                    "switched to timer-driven ticks"
                );
            }
            SchedulerMode::TimerDriven(_) if visibility.is_foreground() && session_active => {
                self.transition(platform, Some(Delivery::Frame));
                info!("switched to frame-driven ticks");
            }
            _ => {}
        }
    }

    /// Handle a fired frame callback. Returns `false` for a stray handle.
    pub fn on_frame<P, H>(
        &mut self,
        platform: &mut P,
        handle: CallbackHandle,
        timestamp: Duration,
        handler: &mut H,
    ) -> bool
    where
        P: Platform + ?Sized,
        H: TickHandler + ?Sized,
    {
        if self.mode != SchedulerMode::FrameDriven(handle) {
            debug!(
                handle = handle.raw(),
                mode = self.mode.as_str(),
                "ignoring stray frame callback"
            );
            return false;
        }

        let elapsed = match self.last_frame {
            Some(last) => timestamp.saturating_sub(last),
            None => self.nominal_dt,
        };
        self.last_frame = Some(timestamp);
        if elapsed > self.nominal_dt.saturating_mul(FRAME_STALL_FACTOR) {
            debug!(?elapsed, "frame stall");
        }

        self.run_tick(handler, timestamp);
        self.transition(platform, Some(Delivery::Frame));
        true
    }

    /// Handle a fired interval callback. Returns `false` for a stray handle.
    pub fn on_interval<P, H>(
        &mut self,
        _platform: &mut P,
        handle: CallbackHandle,
        now: Duration,
        handler: &mut H,
    ) -> bool
    where
        P: Platform + ?Sized,
        H: TickHandler + ?Sized,
    {
        if self.mode != SchedulerMode::TimerDriven(handle) {
            debug!(
                handle = handle.raw(),
                mode = self.mode.as_str(),
                "ignoring stray interval callback"
            );
            return false;
        }
        self.run_tick(handler, now);
        true
    }

    fn run_tick<H: TickHandler + ?Sized>(&mut self, handler: &mut H, now: Duration) {
        self.ticks += 1;
        trace!(tick = self.ticks, ?now, "tick");
        handler.simulate(self.nominal_dt);
        handler.maybe_publish(now);
        handler.render();
    }

    /// The only place callback chains are armed or cancelled.
    fn transition<P: Platform + ?Sized>(&mut self, platform: &mut P, next: Option<Delivery>) {
        let previous = std::mem::replace(&mut self.mode, SchedulerMode::Stopped);
        match previous {
            SchedulerMode::Stopped => {}
            SchedulerMode::FrameDriven(handle) => platform.cancel_frame(handle),
            SchedulerMode::TimerDriven(handle) => platform.cancel_interval(handle),
        }

        self.mode = match next {
            None => SchedulerMode::Stopped,
            Some(Delivery::Frame) => {
                if !matches!(previous, SchedulerMode::FrameDriven(_)) {
                    self.last_frame = None;
                }
                SchedulerMode::FrameDriven(platform.request_frame())
            }
            Some(Delivery::Timer) => {
                SchedulerMode::TimerDriven(platform.start_interval(self.timer_period))
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;
    use proptest::prelude::*;

    const PERIOD: Duration = Duration::from_millis(16);

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        dts: Vec<Duration>,
    }

    impl TickHandler for Recorder {
        fn simulate(&mut self, dt: Duration) {
            self.calls.push("simulate");
            self.dts.push(dt);
        }

        fn maybe_publish(&mut self, _now: Duration) {
            self.calls.push("publish");
        }

        fn render(&mut self) {
            self.calls.push("render");
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(PERIOD, PERIOD)
    }

    fn fire_frame(
        scheduler: &mut Scheduler,
        platform: &mut HeadlessPlatform,
        at: Duration,
        handler: &mut Recorder,
    ) -> bool {
        match platform.fire_frame() {
            Some(handle) => scheduler.on_frame(platform, handle, at, handler),
            None => false,
        }
    }

    #[test]
    fn test_start_in_foreground_arms_frame() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();

        assert!(scheduler.start(&mut platform, Visibility::foreground()));
        assert!(matches!(scheduler.mode(), SchedulerMode::FrameDriven(_)));
        assert_eq!(platform.armed_chains(), 1);
        assert!(platform.pending_frame().is_some());
    }

    #[test]
    fn test_start_in_background_arms_interval() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();

        assert!(scheduler.start(&mut platform, Visibility::hidden()));
        assert!(matches!(scheduler.mode(), SchedulerMode::TimerDriven(_)));
        let (_, period) = platform.interval().unwrap();
        assert_eq!(period, PERIOD);
        assert_eq!(platform.armed_chains(), 1);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();

        assert!(scheduler.start(&mut platform, Visibility::foreground()));
        assert!(!scheduler.start(&mut platform, Visibility::foreground()));
        assert_eq!(platform.frames_requested(), 1);
        assert_eq!(platform.armed_chains(), 1);
    }

    #[test]
    fn test_tick_order_and_rearm() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        let mut handler = Recorder::default();
        scheduler.start(&mut platform, Visibility::foreground());
        let first = platform.pending_frame().unwrap();

        assert!(fire_frame(&mut scheduler, &mut platform, Duration::from_millis(16), &mut handler));

        assert_eq!(handler.calls, vec!["simulate", "publish", "render"]);
        assert_eq!(scheduler.ticks(), 1);
        let second = platform.pending_frame().unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.mode(), SchedulerMode::FrameDriven(second));
        assert_eq!(platform.armed_chains(), 1);
    }

    #[test]
    fn test_simulate_gets_nominal_dt_after_stall() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        let mut handler = Recorder::default();
        scheduler.start(&mut platform, Visibility::foreground());

        fire_frame(&mut scheduler, &mut platform, Duration::from_millis(16), &mut handler);
        fire_frame(&mut scheduler, &mut platform, Duration::from_millis(500), &mut handler);

        assert_eq!(handler.dts, vec![PERIOD, PERIOD]);
    }

    #[test]
    fn test_huge_nominal_dt_does_not_panic_stall_check() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = Scheduler::new(PERIOD, Duration::MAX);
        let mut handler = Recorder::default();
        scheduler.start(&mut platform, Visibility::foreground());

        assert!(fire_frame(&mut scheduler, &mut platform, PERIOD, &mut handler));
        assert!(fire_frame(&mut scheduler, &mut platform, PERIOD * 2, &mut handler));

        assert_eq!(scheduler.ticks(), 2);
        assert_eq!(handler.dts, vec![Duration::MAX, Duration::MAX]);
    }

    #[test]
    fn test_hidden_switches_to_timer() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        scheduler.start(&mut platform, Visibility::foreground());

        scheduler.on_visibility(&mut platform, Visibility::hidden(), true);

        assert!(matches!(scheduler.mode(), SchedulerMode::TimerDriven(_)));
        assert_eq!(platform.pending_frame(), None);
        assert_eq!(platform.armed_chains(), 1);
    }

    #[test]
    fn test_blur_alone_switches_to_timer() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        scheduler.start(&mut platform, Visibility::foreground());

        let blurred = Visibility {
            visible: true,
            focused: false,
        };
        scheduler.on_visibility(&mut platform, blurred, true);

        assert!(matches!(scheduler.mode(), SchedulerMode::TimerDriven(_)));
    }

    #[test]
    fn test_foreground_restores_frames_only_when_active() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        scheduler.start(&mut platform, Visibility::hidden());

        scheduler.on_visibility(&mut platform, Visibility::foreground(), false);
        assert!(matches!(scheduler.mode(), SchedulerMode::TimerDriven(_)));

        scheduler.on_visibility(&mut platform, Visibility::foreground(), true);
        assert!(matches!(scheduler.mode(), SchedulerMode::FrameDriven(_)));
        assert_eq!(platform.interval(), None);
        assert_eq!(platform.armed_chains(), 1);
    }

    #[test]
    fn test_visibility_ignored_when_stopped() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();

        scheduler.on_visibility(&mut platform, Visibility::hidden(), true);
        scheduler.on_visibility(&mut platform, Visibility::foreground(), true);

        assert_eq!(scheduler.mode(), SchedulerMode::Stopped);
        assert_eq!(platform.armed_chains(), 0);
    }

    #[test]
    fn test_stop_cancels_and_ignores_late_callbacks() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        let mut handler = Recorder::default();
        scheduler.start(&mut platform, Visibility::foreground());
        let pending = platform.pending_frame().unwrap();

        scheduler.stop(&mut platform);
        assert_eq!(scheduler.mode(), SchedulerMode::Stopped);
        assert_eq!(platform.armed_chains(), 0);

        let late = Duration::from_millis(16);
        assert!(!scheduler.on_frame(&mut platform, pending, late, &mut handler));
        assert!(handler.calls.is_empty());
        assert_eq!(platform.armed_chains(), 0);
    }

    #[test]
    fn test_stray_interval_after_switch_is_ignored() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        let mut handler = Recorder::default();
        scheduler.start(&mut platform, Visibility::hidden());
        let (old, _) = platform.interval().unwrap();

        scheduler.on_visibility(&mut platform, Visibility::foreground(), true);

        let late = Duration::from_millis(32);
        assert!(!scheduler.on_interval(&mut platform, old, late, &mut handler));
        assert_eq!(scheduler.ticks(), 0);
    }

    #[test]
    fn test_interval_tick_keeps_chain() {
        let mut platform = HeadlessPlatform::new();
        let mut scheduler = scheduler();
        let mut handler = Recorder::default();
        scheduler.start(&mut platform, Visibility::hidden());
        let (handle, _) = platform.interval().unwrap();

        for now in [PERIOD, PERIOD * 2] {
            assert!(scheduler.on_interval(&mut platform, handle, now, &mut handler));
        }

        assert_eq!(scheduler.ticks(), 2);
        assert_eq!(platform.intervals_started(), 1);
        assert_eq!(handler.dts, vec![PERIOD, PERIOD]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start(bool, bool),
        Stop,
        Visibility(bool, bool, bool),
        FireFrame,
        FireInterval,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<bool>(), any::<bool>()).prop_map(|(v, f)| Op::Start(v, f)),
            Just(Op::Stop),
            (any::<bool>(), any::<bool>(), any::<bool>())
                .prop_map(|(v, f, a)| Op::Visibility(v, f, a)),
            Just(Op::FireFrame),
            Just(Op::FireInterval),
        ]
    }

    proptest! {
        #[test]
        fn test_at_most_one_chain_armed(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut platform = HeadlessPlatform::new();
            let mut scheduler = scheduler();
            let mut handler = Recorder::default();
            let mut now = Duration::ZERO;

            for op in ops {
                now += PERIOD;
                match op {
                    Op::Start(visible, focused) => {
                        scheduler.start(&mut platform, Visibility { visible, focused });
                    }
                    Op::Stop => scheduler.stop(&mut platform),
                    Op::Visibility(visible, focused, active) => {
                        let visibility = Visibility { visible, focused };
                        scheduler.on_visibility(&mut platform, visibility, active);
                    }
                    Op::FireFrame => {
                        fire_frame(&mut scheduler, &mut platform, now, &mut handler);
                    }
                    Op::FireInterval => {
                        if let Some((handle, _)) = platform.interval() {
                            scheduler.on_interval(&mut platform, handle, now, &mut handler);
                        }
                    }
                }

                let expected = usize::from(scheduler.mode().is_running());
                prop_assert_eq!(platform.armed_chains(), expected);
            }
        }
    }
}
