mod common;

use common::{ChipCall, TestScheduler, raise, scheduler, scheduler_with};
use sampler_core::wear::{SwitchMode, WearDetect};
use sampler_core::{EventExtra, FunctionId, IrqEvents, SchedulerConfig, SoftEvents};

fn soft_confirm() -> TestScheduler {
    scheduler_with(SchedulerConfig {
        soft_adt_confirm: true,
        ..SchedulerConfig::default()
    })
}

fn event_switches(scheduler: &TestScheduler) -> usize {
    scheduler
        .chip()
        .calls
        .iter()
        .filter(|call| matches!(call, ChipCall::Wear(_, SwitchMode::EventDriven)))
        .count()
}

#[test]
fn hardware_wear_on_arms_wear_off() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    raise(&mut scheduler, IrqEvents::WEAR_ON);

    let summary = scheduler.run_interrupt_cycle().expect("cycle runs");

    assert_eq!(summary.events, IrqEvents::WEAR_ON);
    assert_eq!(scheduler.state().wear().detect(), WearDetect::WearOff);
    assert!(
        scheduler
            .chip()
            .calls
            .contains(&ChipCall::Wear(WearDetect::WearOff, SwitchMode::EventDriven))
    );
    assert_eq!(scheduler.sink().wear.len(), 1);
    assert_eq!(scheduler.sink().wear[0].events, IrqEvents::WEAR_ON);
}

#[test]
fn refused_switch_suppresses_the_event() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    scheduler.chip_mut().refuse_event_switch = true;
    raise(&mut scheduler, IrqEvents::WEAR_ON);

    let summary = scheduler.run_interrupt_cycle().expect("cycle runs");

    assert!(summary.events.is_empty());
    assert_eq!(
        scheduler.state().wear().detect(),
        WearDetect::WearOff,
        "detect state follows the event even when the switch is refused"
    );
    assert!(scheduler.sink().wear.is_empty());
}

#[test]
fn wear_bits_without_adt_are_dropped() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Hr.mask())
        .expect("start HR");
    raise(&mut scheduler, IrqEvents::WEAR_ON | IrqEvents::WEAR_OFF);

    let summary = scheduler.run_interrupt_cycle().expect("cycle runs");

    assert!(summary.events.is_empty());
    assert_eq!(event_switches(&scheduler), 0);
}

#[test]
fn unowned_wear_off_is_discarded() {
    let mut scheduler = soft_confirm();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    assert!(!scheduler.state().wear().hard_adt_owned());
    assert!(scheduler.state().wear().timer_running());
    raise(&mut scheduler, IrqEvents::WEAR_OFF);

    let summary = scheduler.run_interrupt_cycle().expect("cycle runs");

    assert!(summary.events.is_empty());
    assert_eq!(event_switches(&scheduler), 0);
    assert!(scheduler.sink().wear.is_empty());
    assert_eq!(scheduler.state().wear().detect(), WearDetect::WearOn);
}

#[test]
fn movement_confirms_wear_on() {
    let mut scheduler = soft_confirm();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    scheduler.start_hard_adt().expect("movement seen");
    assert!(scheduler.state().wear().hard_adt_owned());
    scheduler.algorithms_mut().movement = true;
    raise(&mut scheduler, IrqEvents::WEAR_ON);

    scheduler.run_interrupt_cycle().expect("cycle runs");

    let report = scheduler.sink().wear.last().copied().expect("wear hook called");
    assert_eq!(report.events, IrqEvents::WEAR_ON);
    assert_eq!(report.extra, EventExtra::LIVING);
    assert_eq!(scheduler.algorithms().motion_stops, 1);
    assert!(!scheduler.state().wear().timer_running());
    assert!(!scheduler.algorithms().timer);
}

#[test]
fn unconfirmed_wear_on_is_withheld() {
    let mut scheduler = soft_confirm();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    scheduler.start_hard_adt().expect("movement seen");
    raise(&mut scheduler, IrqEvents::WEAR_ON);

    let summary = scheduler.run_interrupt_cycle().expect("cycle runs");

    assert!(!summary.events.contains(IrqEvents::WEAR_ON));
    assert!(scheduler.sink().wear.is_empty());
    assert!(scheduler.state().wear().timer_running(), "still waiting for movement");
}

#[test]
fn hand_over_to_motion_detection() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    raise(&mut scheduler, IrqEvents::WEAR_ON);
    scheduler.run_interrupt_cycle().expect("wear-on cycle");

    scheduler
        .stop_hard_adt_and_start_motion_detect()
        .expect("hand over");

    let wear = scheduler.state().wear();
    assert_eq!(wear.detect(), WearDetect::WearOn);
    assert!(!wear.hard_adt_owned());
    assert!(wear.timer_running());
    assert!(scheduler.chip().calls.contains(&ChipCall::Stop(FunctionId::Adt)));
    assert!(
        scheduler
            .chip()
            .calls
            .contains(&ChipCall::Wear(WearDetect::WearOn, SwitchMode::Forced))
    );
    assert!(scheduler.sink().reported(IrqEvents::WEAR_OFF));

    scheduler.start_hard_adt().expect("take it back");
    assert!(scheduler.state().wear().hard_adt_owned());
    assert_eq!(scheduler.algorithms().motion_resets, 2);
}

#[test]
fn hand_over_without_adt_is_a_noop() {
    let mut scheduler = scheduler();
    let calls = scheduler.chip().calls.len();

    scheduler
        .stop_hard_adt_and_start_motion_detect()
        .expect("accepted");
    scheduler.start_hard_adt().expect("accepted");

    assert_eq!(scheduler.chip().calls.len(), calls);
    assert!(!scheduler.state().wear().timer_running());
}

#[test]
fn soft_wear_on_is_folded_into_the_pass() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    scheduler.raise_soft_event(SoftEvents::WEAR_ON);

    let summary = scheduler.run_interrupt_cycle().expect("soft event runs the loop");

    assert_eq!(summary.events, IrqEvents::WEAR_ON);
    assert_eq!(scheduler.state().wear().detect(), WearDetect::WearOff);
    assert_eq!(scheduler.sink().wear[0].extra, EventExtra::LIVING);
    assert!(scheduler.state().soft_events().is_empty());
}

#[test]
fn redetect_rearms_a_worn_device() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    let reports = scheduler.sink().reports.len();
    scheduler.redetect_wear_on().expect("not worn, nothing to do");
    assert_eq!(scheduler.sink().reports.len(), reports);

    raise(&mut scheduler, IrqEvents::WEAR_ON);
    scheduler.run_interrupt_cycle().expect("wear-on cycle");
    scheduler.redetect_wear_on().expect("rearm");

    assert_eq!(scheduler.state().wear().detect(), WearDetect::WearOn);
    let last = scheduler.sink().reports.last().expect("report");
    assert_eq!(last.events, IrqEvents::WEAR_OFF);
    assert!(!last.synthetic);
}

#[test]
fn motion_tick_feeds_only_while_timer_runs() {
    let mut scheduler = scheduler();
    scheduler.motion_tick().expect("idle tick");
    assert_eq!(scheduler.algorithms().fed, 0);

    let mut scheduler = soft_confirm();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");
    scheduler.motion_tick().expect("tick");
    scheduler.motion_tick().expect("tick");
    assert_eq!(scheduler.algorithms().fed, 2);
}

#[test]
fn stopping_adt_stops_the_confirm_timer() {
    let mut scheduler = soft_confirm();
    scheduler
        .start_sampling(FunctionId::Adt.mask())
        .expect("start ADT");

    scheduler
        .stop_sampling(FunctionId::Adt.mask())
        .expect("stop ADT");

    assert!(!scheduler.state().wear().timer_running());
    assert!(!scheduler.algorithms().timer);
    assert_eq!(scheduler.algorithms().motion_resets, 1);
}
