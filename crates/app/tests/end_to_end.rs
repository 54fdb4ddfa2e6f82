//! Selector → controller → wire chain over a realistic single-detection
//! frame, exercising the stages the way one orchestrator iteration does.

use ml_engine::{select, Detection, DetectionSet};
use servo_control::{encode_step, AimOffset, MotionController};
use visual_servo::config::AppConfig;

const CONFIG: &str = r#"
    [capture]
    region_size = 640

    [model]
    path = "network.onnx"
    labels = ["target", "down", "friend"]
    hostile = ["target"]
    confidence = 0.5

    [control]
    lock_radius = 200.0
    max_step_distance = 100.0
    max_pid_distance = 20.0
    head_bias = 0.25

    [serial]
    device = "COM10"
"#;

#[test]
fn single_detection_flows_to_a_bounded_wire_command() {
    let config: AppConfig = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();

    let selector_config = config.selector_config().unwrap();
    let aim_point = selector_config.aim_point;
    assert_eq!(aim_point, (320.0, 320.0));

    // One confident hostile detection near the center of a 640x640 region.
    let mut detections = DetectionSet::default();
    detections.push(Detection {
        bbox: [300.0, 300.0, 340.0, 380.0],
        score: 0.9,
        class_id: 0,
    });

    let target = select(&detections, &selector_config).expect("target selected");
    // Horizontal center 320; vertical midpoint 340 biased up by 0.25 * 80.
    assert_eq!(target.center_x, 320.0);
    assert_eq!(target.center_y, 320.0);
    assert!(target.distance < 1.0, "target sits at the aim point");

    // Push the target off-center so the controller lands in the
    // proportional band: above max_pid_distance, below max_step_distance.
    let mut off_center = DetectionSet::default();
    off_center.push(Detection {
        bbox: [330.0, 310.0, 370.0, 390.0],
        score: 0.9,
        class_id: 0,
    });
    let target = select(&off_center, &selector_config).expect("target selected");
    let (dx, dy) = target.offset_from(aim_point);
    assert!(
        target.distance > config.control.max_pid_distance
            && target.distance < config.control.max_step_distance,
        "scenario distance {} must fall between the regime thresholds",
        target.distance
    );

    let mut controller = MotionController::new(config.control_config());
    let step = controller.update(Some(AimOffset {
        dx,
        dy,
        distance: target.distance,
    }));

    assert!(!step.is_zero(), "proportional band emits a nonzero delta");
    let magnitude = step.dx.hypot(step.dy);
    assert!(
        magnitude <= config.control.max_step_distance * config.control.sensitivity + 1e-3,
        "delta magnitude {magnitude} exceeds the step bound"
    );

    // Wire encoding matches the delta, normal prefix.
    let command = encode_step(step.dx, step.dy, "");
    assert_eq!(
        command,
        format!("{}:{}", step.dx.round() as i64, step.dy.round() as i64)
    );
    assert_eq!(command, "30:10");

    // Covert mode changes only the prefix.
    let covert = encode_step(step.dx, step.dy, &config.serial.covert_prefix);
    assert_eq!(covert, "silent30:10");
}

#[test]
fn disengaging_mid_track_zeroes_the_controller() {
    let config: AppConfig = toml::from_str(CONFIG).unwrap();
    let selector_config = config.selector_config().unwrap();
    let mut controller = MotionController::new(config.control_config());

    // Near target: PID regime accumulates state.
    let mut detections = DetectionSet::default();
    detections.push(Detection {
        bbox: [310.0, 305.0, 330.0, 345.0],
        score: 0.95,
        class_id: 0,
    });
    let target = select(&detections, &selector_config).expect("target selected");
    assert!(target.distance <= config.control.max_pid_distance);
    let (dx, dy) = target.offset_from(selector_config.aim_point);
    controller.update(Some(AimOffset {
        dx,
        dy,
        distance: target.distance,
    }));

    // Disengage: zero output, zero state.
    let idle = controller.update(None);
    assert!(idle.is_zero());
    assert!(controller.is_reset());
}
