mod common;

use common::{ChipCall, raise, scheduler};
use sampler_core::scheduler::RecoveryReport;
use sampler_core::wear::WearDetect;
use sampler_core::{DriverError, FunctionId, FunctionMask, IrqEvents, SchedulerError};

#[test]
fn unexpected_reset_restores_functions_and_wear() {
    let mut scheduler = scheduler();
    let running = FunctionId::Adt.mask() | FunctionId::Hr.mask();
    scheduler.start_sampling(running).expect("start ADT and HR");
    raise(&mut scheduler, IrqEvents::WEAR_ON);
    scheduler.run_interrupt_cycle().expect("wear-on cycle");
    assert_eq!(scheduler.state().wear().detect(), WearDetect::WearOff);

    raise(&mut scheduler, IrqEvents::CHIP_RESET);
    let summary = scheduler.run_interrupt_cycle().expect("reset cycle");

    assert_eq!(
        scheduler.state().last_recovery(),
        Some(RecoveryReport {
            attempts: 1,
            reinitialized: true,
            restored: running,
        })
    );
    assert_eq!(scheduler.state().active(), running);
    assert_eq!(
        scheduler.state().wear().detect(),
        WearDetect::WearOff,
        "worn device stays armed for wear-off"
    );
    assert!(scheduler.state().wear().hard_adt_owned());
    assert!(!scheduler.state().recovery().is_recovering());
    assert!(summary.events.contains(IrqEvents::CHIP_RESET));
    assert_eq!(
        scheduler.chip().calls.last(),
        Some(&ChipCall::LowPower),
        "pass ends in low power"
    );
}

#[test]
fn recovery_does_not_restart_algorithms() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Hr.mask())
        .expect("start HR");
    raise(&mut scheduler, IrqEvents::CHIP_RESET);

    scheduler.run_interrupt_cycle().expect("reset cycle");

    assert_eq!(scheduler.algorithms().started, vec![FunctionId::Hr]);
    assert!(scheduler.algorithms().stopped.is_empty());
    assert_eq!(scheduler.state().active(), FunctionId::Hr.mask());
}

#[test]
fn unreadable_status_is_handled_as_reset() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Hr.mask())
        .expect("start HR");
    scheduler
        .chip_mut()
        .irq
        .push_back(Err(DriverError::Communication));
    scheduler.note_interrupt();

    let summary = scheduler.run_interrupt_cycle().expect("cycle absorbs the failure");

    assert_eq!(summary.passes, 2, "stop during recovery forces a second read");
    assert_eq!(
        scheduler.state().last_recovery(),
        Some(RecoveryReport {
            attempts: 1,
            reinitialized: true,
            restored: FunctionId::Hr.mask(),
        })
    );
}

#[test]
fn retry_budget_bounds_reinit_attempts() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Hr.mask())
        .expect("start HR");
    scheduler.chip_mut().failing_loads = 100;
    raise(&mut scheduler, IrqEvents::CHIP_RESET);

    scheduler.run_interrupt_cycle().expect("cycle completes");

    assert_eq!(
        scheduler.state().last_recovery(),
        Some(RecoveryReport {
            attempts: 5,
            reinitialized: false,
            restored: FunctionMask::EMPTY,
        })
    );
    assert_eq!(
        scheduler.chip().loads(),
        7,
        "init, five attempts and the failed restart"
    );
    assert_eq!(scheduler.state().config_index(), None);
    assert!(
        matches!(
            scheduler.start_sampling(FunctionId::Hr.mask()),
            Err(SchedulerError::Resource { .. })
        ),
        "configuration still refuses to load"
    );
}

#[test]
fn requested_reset_takes_the_plain_path() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling(FunctionId::Hr.mask())
        .expect("start HR");

    scheduler.request_chip_reset().expect("reset accepted");
    assert_eq!(scheduler.chip().resets(), 2);
    raise(&mut scheduler, IrqEvents::CHIP_RESET);
    scheduler.run_interrupt_cycle().expect("reset cycle");

    assert_eq!(scheduler.state().active(), FunctionMask::EMPTY);
    assert_eq!(scheduler.state().last_recovery(), None);
    assert_eq!(scheduler.algorithms().stopped, vec![FunctionId::Hr]);
    assert_eq!(scheduler.chip().loads(), 2);
    assert_eq!(scheduler.state().config_index(), Some(0));

    scheduler
        .start_sampling(FunctionId::Hr.mask())
        .expect("restart HR");
    raise(&mut scheduler, IrqEvents::CHIP_RESET);
    scheduler.run_interrupt_cycle().expect("second reset cycle");
    assert!(
        scheduler.state().last_recovery().is_some(),
        "an unrequested reset goes through recovery again"
    );
}

#[test]
fn idle_reset_reloads_the_configuration() {
    let mut scheduler = scheduler();
    scheduler
        .start_sampling_with_config(FunctionId::Ecg.mask(), 1)
        .expect("ECG in the second configuration");
    scheduler
        .stop_sampling(FunctionId::Ecg.mask())
        .expect("stop ECG");
    raise(&mut scheduler, IrqEvents::CHIP_RESET);

    scheduler.run_interrupt_cycle().expect("reset cycle");

    assert_eq!(scheduler.chip().count(&ChipCall::Load("ecg")), 2);
    assert_eq!(scheduler.state().config_index(), Some(1));
    assert_eq!(scheduler.state().last_recovery(), None);
}

#[test]
fn reset_request_needs_initialization() {
    let mut scheduler = scheduler();
    scheduler.chip_mut().irq.push_back(Ok(IrqEvents::FIFO_WATERMARK));
    scheduler.note_interrupt();
    scheduler.sensors_mut().accel_count_override = Some(1000);
    assert!(scheduler.run_interrupt_cycle().is_err());

    assert_eq!(
        scheduler.request_chip_reset(),
        Err(SchedulerError::Uninitialized)
    );
}
