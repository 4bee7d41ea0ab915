use std::time::{Duration, Instant};
use upspack_monitor::serial::mock::MockSerialLink;
use upspack_monitor::state::ChargeMode;
use upspack_monitor::telemetry::RetryPolicy;
use upspack_monitor::ups::{ControllerOptions, FeedState, UpsController};

const CHARGING_AT_50: &str = "$SmartUPS v1,Vin GOOD,BATCAP 50,Vout 5000$";

fn options(use_caching: bool) -> ControllerOptions {
    ControllerOptions {
        use_caching,
        refresh_interval: Duration::from_millis(10),
        retry: RetryPolicy {
            attempts: 3,
            max_jitter: Duration::ZERO,
        },
        min_read_interval: Duration::ZERO,
    }
}

fn push_lines(link: &MockSerialLink, line: &str, count: usize) {
    for _ in 0..count {
        link.push_line(line);
    }
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn charging_frame_reports_status_and_waits_for_level_change() {
    let link = MockSerialLink::default();
    push_lines(&link, CHARGING_AT_50, 16);
    let controller = UpsController::with_link(link.clone(), options(false));

    assert_eq!(controller.charging(), Some(true));
    assert_eq!(controller.discharging(), Some(false));
    assert_eq!(controller.vout(), Some(5.0));
    assert_eq!(controller.battery_level(), Some(50));
    assert_eq!(controller.hardware_version().as_deref(), Some("v1"));
    assert_eq!(controller.feed_state(), FeedState::Ready);
    let verbose = controller.verbose().unwrap_or_default();
    assert!(verbose.contains("charging") || verbose.contains("trickling"));
    assert_eq!(controller.time_left(), None);

    // Rates are measured in whole seconds since the episode opened.
    std::thread::sleep(Duration::from_millis(1100));
    push_lines(&link, "$SmartUPS v1,Vin GOOD,BATCAP 51,Vout 5000$", 4);
    // Skip any unread lines at the old level.
    while link.remaining() > 4 {
        let _ = controller.battery_level();
    }

    let status = controller.status();
    assert_eq!(status.battery_level, Some(51));
    assert!(status.time_left_secs.is_some_and(|secs| secs > 0));
    assert!(
        status
            .verbose
            .as_deref()
            .is_some_and(|verbose| verbose.contains("Time until full"))
    );
}

#[test]
fn background_cache_follows_mains_flip() {
    let link = MockSerialLink::default();
    push_lines(&link, CHARGING_AT_50, 3);
    let controller = UpsController::with_link(link.clone(), options(true));

    assert!(wait_for(|| controller.mode() == ChargeMode::Charging));

    push_lines(&link, "$SmartUPS v1,Vin NG,BATCAP 49,Vout 4800$", 1000);

    assert!(wait_for(|| controller.discharging() == Some(true)));
    assert_eq!(controller.mode(), ChargeMode::Discharging);
    assert_eq!(controller.charging(), Some(false));
    assert_eq!(
        controller.verbose().as_deref(),
        Some("Battery is discharging; currently at 49%.")
    );
    controller.stop();
}

#[test]
fn unplugged_link_degrades_every_accessor_to_unknown() {
    let controller = UpsController::with_link(MockSerialLink::default(), options(true));

    assert!(wait_for(|| controller.feed_state() == FeedState::Failed));
    assert_eq!(controller.vout(), None);
    assert_eq!(controller.battery_level(), None);
    assert_eq!(controller.charging(), None);
    assert_eq!(controller.discharging(), None);
    assert_eq!(controller.hardware_version(), None);
    assert_eq!(controller.verbose(), None);
    assert_eq!(controller.time_left(), None);
    controller.stop();
}
