use approx::assert_relative_eq;
use serde_json::json;
use wavemorph::sequencer::{LookaheadScheduler, Step};
use wavemorph::synth::note::NoteKey;
use wavemorph::synth::Synth;
use wavemorph::{SynthConfig, SynthEngine};

fn c2(gate: f32) -> Option<Step> {
    Some(Step {
        velocity: 0.8,
        gate,
        ..Step::with_note("C2")
    })
}

/// An engine at 120 BPM with every lane silent, and its render path.
fn quiet_pair() -> (SynthEngine, Synth) {
    let (mut engine, synth) = SynthEngine::new(SynthConfig::default());
    engine
        .update_patch(&json!({ "global": { "bpm": 120.0, "swing": 0.0 } }))
        .unwrap();
    for lane in ["bass", "stab", "pad", "automation"] {
        engine.set_sequencer_lane(lane, 4, vec![None; 4]).unwrap();
    }
    (engine, synth)
}

fn quiet_engine() -> SynthEngine {
    quiet_pair().0
}

/// Hands every queued command to the render path without advancing time.
fn drain(synth: &mut Synth) {
    synth.process(&mut [0.0f32; 0], 2);
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

#[test]
fn test_two_step_pattern_schedules_gated_releases() {
    let mut engine = quiet_engine();
    engine
        .set_sequencer_lane("stab", 4, vec![c2(0.4), None, c2(0.4), None])
        .unwrap();
    engine.start_sequencer();

    engine.tick();
    assert_eq!(engine.active_voice_count(), 1);
    let releases: Vec<f64> = engine.pending_releases().iter().map(|r| r.time).collect();
    println!("releases after first tick: {:?}", releases);
    assert_eq!(releases.len(), 1);
    assert_relative_eq!(releases[0], 0.4, epsilon = 1e-9);

    // Horizon now reaches the third step at 0.25s
    engine.context().set_time(0.2);
    engine.tick();
    assert_eq!(engine.active_voice_count(), 2);
    let releases: Vec<f64> = engine.pending_releases().iter().map(|r| r.time).collect();
    assert_eq!(releases.len(), 2);
    assert_relative_eq!(releases[0], 0.4, epsilon = 1e-9);
    assert_relative_eq!(releases[1], 0.65, epsilon = 1e-9);

    // Stop before the pattern wraps; both releases fall inside the horizon
    engine.stop_sequencer();
    engine.context().set_time(0.6);
    engine.tick();
    assert!(engine.pending_releases().is_empty());
    assert!(engine.pool().voices().all(|v| !v.is_held()));
}

#[test]
fn test_stopping_keeps_queued_releases() {
    let mut engine = quiet_engine();
    engine
        .set_sequencer_lane("stab", 4, vec![c2(1.0), None, None, None])
        .unwrap();
    engine.start_sequencer();
    engine.tick();
    engine.stop_sequencer();
    assert!(!engine.is_sequencer_running());
    assert_eq!(engine.pending_releases().len(), 1);

    engine.context().set_time(0.95);
    engine.tick();
    assert!(engine.pending_releases().is_empty());
    assert_eq!(engine.pool().mapped_notes(), 0);
}

#[test]
fn test_automation_step_writes_the_patch() {
    let mut engine = quiet_engine();
    let step: Step = serde_json::from_value(json!({
        "targets": [{ "id": "filters.filter1.cutoff", "value": 3200.0 }]
    }))
    .unwrap();
    engine
        .set_sequencer_lane("automation", 4, vec![Some(step), None, None, None])
        .unwrap();
    engine.start_sequencer();
    engine.tick();
    assert_eq!(engine.patch().filters.filter1.cutoff, 3200.0);
    assert!(engine.is_sequencer_running());
    assert_eq!(engine.active_voice_count(), 0);
}

#[test]
fn test_scheduled_times_are_strictly_increasing() {
    let mut scheduler = LookaheadScheduler::new(0.1, 0.025);
    scheduler.start(0.0);
    let mut times = Vec::new();
    let mut now = 0.0;
    while now < 4.0 {
        let horizon = now + scheduler.schedule_ahead();
        scheduler.tick(now, 133.0, 35.0, |t| {
            assert!(t < horizon);
            times.push(t);
        });
        now += scheduler.tick_interval();
    }
    assert!(times.len() > 20);
    assert!(times.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(times[0], 0.0);
}

#[test]
fn test_ratchet_on_a_legato_lane_plays_every_hit() {
    let (mut engine, mut synth) = quiet_pair();
    drain(&mut synth);
    let ratcheted = Step {
        ratchet: 2,
        ..Step::with_note("C2")
    };
    engine
        .set_sequencer_lane("bass", 4, vec![Some(ratcheted), None, None, None])
        .unwrap();
    engine.start_sequencer();
    engine.tick();
    engine.stop_sequencer();

    // Both hits land on the bass lane's one voice
    assert_eq!(engine.active_voice_count(), 1);
    assert_eq!(synth.queued_commands(), 2);
    let slot = engine.pool().slot_for(&NoteKey::new("bass", 36)).unwrap();

    let first = synth.render_offline(0.05);
    let voice = synth.voice(slot).unwrap();
    println!("first hit peak: {}", peak(&first));
    assert!(voice.is_active());
    assert!(peak(&first) > 0.01);
    assert_eq!(voice.note_started(), 0.0);
    assert_eq!(voice.queued_events(), 1);

    synth.render_offline(0.05);
    let voice = synth.voice(slot).unwrap();
    assert_relative_eq!(voice.note_started(), 0.0625, epsilon = 1e-9);
    assert_eq!(voice.queued_events(), 0);
}

#[test]
fn test_tie_step_holds_the_note() {
    let (mut engine, mut synth) = quiet_pair();
    let tied = Step {
        tie: true,
        ..Step::with_note("F3")
    };
    engine
        .set_sequencer_lane("stab", 4, vec![Some(tied), None, None, None])
        .unwrap();
    engine.start_sequencer();
    engine.tick();
    engine.stop_sequencer();
    assert!(engine.pending_releases().is_empty());

    synth.render_offline(1.0);
    engine.tick();
    assert_eq!(engine.active_voice_count(), 1);
    assert!(engine.pool().voices().any(|v| v.is_held()));
    assert_eq!(synth.sounding_voices(), 1);
}

#[test]
fn test_slide_step_reuses_the_voice() {
    let slid = |slide: bool| {
        Some(Step {
            slide,
            ..Step::with_note("F3")
        })
    };
    for slide in [false, true] {
        let mut engine = quiet_engine();
        engine
            .set_sequencer_lane("stab", 4, vec![slid(false), slid(slide), None, None])
            .unwrap();
        engine.start_sequencer();
        engine.tick();
        let key = NoteKey::new("stab", 53);
        let first = engine.pool().slot_for(&key).unwrap();

        // Horizon reaches the second step at 0.125s
        engine.context().set_time(0.05);
        engine.tick();
        let second = engine.pool().slot_for(&key).unwrap();
        if slide {
            assert_eq!(engine.active_voice_count(), 1);
            assert_eq!(second, first);
        } else {
            assert_eq!(engine.active_voice_count(), 2);
            assert_ne!(second, first);
        }
    }
}

#[test]
fn test_empty_automation_steps_send_nothing() {
    let (mut engine, mut synth) = SynthEngine::new(SynthConfig::default());
    for lane in ["bass", "stab", "pad"] {
        engine.set_sequencer_lane(lane, 16, vec![None; 16]).unwrap();
    }
    // The automation lane keeps its default steps, all without targets
    let automation = engine.patch().sequencer.lane("automation").unwrap();
    assert!(automation
        .pattern
        .iter()
        .all(|s| s.as_ref().is_some_and(|s| s.targets.is_empty())));

    drain(&mut synth);
    engine.start_sequencer();
    for i in 0..20 {
        engine.context().set_time(f64::from(i) * 0.05);
        engine.tick();
    }
    assert_eq!(synth.queued_commands(), 0);
    assert_eq!(engine.dropped_commands(), 0);
}

#[test]
fn test_repeated_automation_value_is_applied_once() {
    let (mut engine, mut synth) = quiet_pair();
    let step: Step = serde_json::from_value(json!({
        "targets": [{ "id": "fx.reverb.mix", "value": 0.5 }]
    }))
    .unwrap();
    engine
        .set_sequencer_lane("automation", 2, vec![Some(step.clone()), Some(step)])
        .unwrap();
    drain(&mut synth);
    engine.start_sequencer();
    engine.tick();
    let after_first = synth.queued_commands();
    assert!(after_first > 0);
    assert_eq!(engine.patch().fx.reverb.mix, 0.5);

    engine.context().set_time(0.05);
    engine.tick();
    assert_eq!(synth.queued_commands(), after_first);
}
