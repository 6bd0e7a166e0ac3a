use std::io::Write;
use std::time::Duration;

use photo_frame_compositor::config::{CompositorConfig, PowerPreference, TransitionSelection};
use photo_frame_compositor::{Direction, Easing, EffectKind, EffectParams, ParticleMode};

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
pool:
  byte-budget: 1048576
watchdog:
  factor: 3.0
gpu:
  enabled: false
  swap-buffers: 2
  power-preference: low-power
telemetry:
  history: 8
"#;
    let cfg: CompositorConfig = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.pool.byte_budget, 1 << 20);
    assert!((cfg.watchdog.factor - 3.0).abs() < f32::EPSILON);
    assert!(!cfg.gpu.enabled);
    assert_eq!(cfg.gpu.swap_buffers, 2);
    assert_eq!(cfg.gpu.power_preference, PowerPreference::LowPower);
    assert_eq!(cfg.telemetry.history, 8);
}

#[test]
fn parse_full_transition_catalogue() {
    let yaml = r#"
transition:
  selection: random
  active:
    - type: crossfade
      duration: 1s
      easing: in-out-quad
    - type: wipe
      direction: down
    - type: slide
      direction: right
      duration: 600ms
    - type: diffuse
      block-px: 8
      seed: 3
    - type: block-flip
      columns: 10
      rows: 4
      direction: up
    - type: blinds
      slats: 6
    - type: particle
      cell-px: 12
      mode: sweep
      seed: 99
    - type: card-flip
      direction: left
      easing: in-out-sine
"#;
    let cfg: CompositorConfig = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    let active = &cfg.transition.active;
    assert_eq!(cfg.transition.selection, TransitionSelection::Random);
    let kinds: Vec<_> = active.iter().map(|p| p.params.kind()).collect();
    assert_eq!(kinds, EffectKind::ALL.to_vec());

    assert_eq!(active[0].duration, Duration::from_secs(1));
    assert_eq!(active[0].easing, Easing::InOutQuad);
    assert_eq!(
        active[1].params,
        EffectParams::Wipe {
            direction: Direction::Down,
            softness: 0.05
        }
    );
    assert_eq!(active[2].duration, Duration::from_millis(600));
    assert_eq!(
        active[6].params,
        EffectParams::Particle {
            cell_px: 12,
            mode: ParticleMode::Sweep,
            seed: 99,
            direction: Direction::Left
        }
    );
    assert_eq!(active[7].easing, Easing::InOutSine);
}

#[test]
fn unknown_effect_type_is_rejected() {
    let yaml = r#"
transition:
  active:
    - type: page-curl
"#;
    assert!(serde_yaml::from_str::<CompositorConfig>(yaml).is_err());
}

#[test]
fn validated_rejects_invalid_numeric_ranges() {
    for yaml in [
        "watchdog:\n  factor: 0.9\n",
        "gpu:\n  swap-buffers: 0\n",
        "gpu:\n  swap-buffers: 4\n",
        "transition:\n  active:\n    - type: blinds\n      slats: 0\n",
        "transition:\n  active:\n    - type: diffuse\n      block-px: 0\n",
    ] {
        let cfg: CompositorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err(), "accepted {yaml:?}");
    }
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "watchdog:\n  factor: 2.5\ntransition:\n  selection: fixed\n  active:\n    - type: slide\n"
    )
    .unwrap();
    let cfg = CompositorConfig::from_yaml_file(file.path())
        .unwrap()
        .validated()
        .unwrap();
    assert!((cfg.watchdog.factor - 2.5).abs() < f32::EPSILON);
    let mut rng = rand::rng();
    let descriptor = cfg.transition.choose(&mut rng).unwrap();
    assert_eq!(descriptor.kind(), EffectKind::Slide);
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let err = CompositorConfig::from_yaml_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.yaml"));
}
