use super::*;
use crate::model::{Action, RuleSet, Tunables};
use crate::rules::{RuleSource, share};

const A: u32 = 116;
const B: u32 = 115;

fn cmd(tag: &str) -> Action {
    Action::RunCommand {
        command: tag.into(),
    }
}

fn tracker_with(tunables: Tunables, rules: Vec<Rule>) -> GestureTracker {
    GestureTracker::new(share(&RuleSet::new(tunables, rules), RuleSource::Store))
}

fn tracker(rules: Vec<Rule>) -> GestureTracker {
    tracker_with(Tunables::default(), rules)
}

fn down(t: &GestureTracker, key: u32, at: u64) -> Option<Gesture> {
    t.on_event(&RawEvent::down(key, at))
}

fn up(t: &GestureTracker, key: u32, at: u64) -> Option<Gesture> {
    t.on_event(&RawEvent::up(key, at))
}

fn kind(g: Option<Gesture>) -> Option<GestureKind> {
    g.map(|g| g.kind)
}

fn poll(t: &GestureTracker, at: u64) -> Vec<TimerFire> {
    t.poll_timers(Timestamp::from_millis(at))
}

#[test]
fn quick_tap_emits_up_once() {
    let t = tracker(vec![]);
    assert_eq!(kind(down(&t, A, 0)), Some(GestureKind::Down));
    let g = up(&t, A, 120).expect("click");
    assert_eq!(g.kind, GestureKind::Up);
    assert_eq!(g.held_duration_ms, 120);
    assert_eq!(g.combo_key, None);
    assert_eq!(up(&t, A, 130), None);
}

#[test]
fn hold_between_thresholds_is_short_press() {
    let t = tracker(vec![]);
    down(&t, A, 0);
    assert_eq!(kind(up(&t, A, 350)), Some(GestureKind::ShortPress));
}

#[test]
fn two_quick_taps_make_one_double_click() {
    let t = tracker(vec![]);
    down(&t, A, 0);
    assert_eq!(kind(up(&t, A, 50)), Some(GestureKind::Up));
    down(&t, A, 150);
    assert_eq!(kind(up(&t, A, 200)), Some(GestureKind::DoubleClick));

    // A third tap starts a fresh count.
    down(&t, A, 260);
    assert_eq!(kind(up(&t, A, 300)), Some(GestureKind::Up));
}

#[test]
fn slow_second_tap_is_two_clicks() {
    let t = tracker(vec![]);
    down(&t, A, 0);
    assert_eq!(kind(up(&t, A, 50)), Some(GestureKind::Up));
    down(&t, A, 400);
    assert_eq!(kind(up(&t, A, 450)), Some(GestureKind::Up));
}

#[test]
fn key_repeat_does_not_restart_timing() {
    let t = tracker(vec![]);
    down(&t, A, 0);
    assert_eq!(down(&t, A, 30), None);
    assert_eq!(down(&t, A, 60), None);
    let g = up(&t, A, 100).unwrap();
    assert_eq!(g.held_duration_ms, 100);
    assert_eq!(g.kind, GestureKind::Up);
}

#[test]
fn release_without_press_is_ignored() {
    let t = tracker(vec![]);
    assert_eq!(up(&t, A, 10), None);
    down(&t, A, 20);
    up(&t, A, 40);
    assert_eq!(up(&t, A, 50), None);
}

#[test]
fn out_of_order_timestamps_never_go_negative() {
    let t = tracker(vec![]);
    down(&t, A, 500);
    let g = up(&t, A, 400).unwrap();
    assert_eq!(g.held_duration_ms, 0);
    assert_eq!(g.kind, GestureKind::Up);
}

#[test]
fn long_press_fires_from_timer_while_held() {
    let t = tracker(vec![Rule::new(A, GestureKind::LongPress, 500, cmd("lp"))]);
    down(&t, A, 0);

    assert!(poll(&t, 400).is_empty());
    let fires = poll(&t, 520);
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].gesture.kind, GestureKind::LongPress);
    assert_eq!(fires[0].gesture.held_duration_ms, 520);
    assert_eq!(fires[0].rule.action, cmd("lp"));
    assert!(t.is_held(PhysicalKey(A)));

    assert!(poll(&t, 600).is_empty(), "same threshold fires once");
    assert_eq!(up(&t, A, 700), None, "long hold without release rule is silent");
    assert!(poll(&t, 900).is_empty(), "timer cancelled on release");
}

#[test]
fn staged_long_press_thresholds_fire_in_turn() {
    let t = tracker(vec![
        Rule::new(A, GestureKind::LongPress, 500, cmd("first")),
        Rule::new(A, GestureKind::LongPress, 2000, cmd("second")),
    ]);
    down(&t, A, 0);

    let early = poll(&t, 550);
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].rule.action, cmd("first"));
    assert!(poll(&t, 1500).is_empty());

    let late = poll(&t, 2050);
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].rule.action, cmd("second"));
    assert!(poll(&t, 2500).is_empty());
}

#[test]
fn new_press_resets_fired_thresholds() {
    let t = tracker(vec![Rule::new(A, GestureKind::LongPress, 500, cmd("lp"))]);
    down(&t, A, 0);
    assert_eq!(poll(&t, 520).len(), 1);
    up(&t, A, 600);

    down(&t, A, 1000);
    assert!(poll(&t, 1400).is_empty());
    assert_eq!(poll(&t, 1510).len(), 1);
}

#[test]
fn release_after_long_press_prefers_release_rule() {
    let t = tracker(vec![
        Rule::new(A, GestureKind::LongPress, 500, cmd("lp")),
        Rule::new(A, GestureKind::LongPressRelease, 500, cmd("lpr")),
    ]);
    down(&t, A, 0);
    assert_eq!(poll(&t, 520).len(), 1);

    let g = up(&t, A, 800).unwrap();
    assert_eq!(g.kind, GestureKind::LongPressRelease);
    assert_eq!(g.held_duration_ms, 800);
}

#[test]
fn long_release_is_detected_on_up_without_a_tick() {
    let t = tracker(vec![Rule::new(A, GestureKind::LongPressRelease, 600, cmd("lpr"))]);
    down(&t, A, 0);
    assert_eq!(kind(up(&t, A, 700)), Some(GestureKind::LongPressRelease));

    // Held past the floor but short of the rule threshold: nothing.
    down(&t, A, 2000);
    assert_eq!(up(&t, A, 2550), None);
}

#[test]
fn long_press_floor_is_not_lowered_by_rule_thresholds() {
    let tunables = Tunables {
        long_press_min_ms: 500,
        short_press_min_ms: 300,
        ..Tunables::default()
    };
    let t = tracker_with(
        tunables,
        vec![Rule::new(A, GestureKind::LongPressRelease, 200, cmd("lpr"))],
    );
    down(&t, A, 0);
    assert!(poll(&t, 250).is_empty());
    assert_eq!(kind(up(&t, A, 320)), Some(GestureKind::ShortPress));

    down(&t, A, 1000);
    assert!(poll(&t, 1510).is_empty());
    assert_eq!(kind(up(&t, A, 1600)), Some(GestureKind::LongPressRelease));
}

#[test]
fn long_press_timer_waits_for_floor() {
    let tunables = Tunables {
        long_press_min_ms: 500,
        short_press_min_ms: 300,
        ..Tunables::default()
    };
    let t = tracker_with(tunables, vec![Rule::new(A, GestureKind::LongPress, 200, cmd("lp"))]);

    down(&t, A, 0);
    assert!(poll(&t, 250).is_empty());
    assert_eq!(kind(up(&t, A, 320)), Some(GestureKind::ShortPress));

    down(&t, A, 1000);
    assert!(poll(&t, 1250).is_empty());
    let fires = poll(&t, 1500);
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].gesture.held_duration_ms, 500);
    assert_eq!(fires[0].rule.min_duration_ms, 200);
    assert!(poll(&t, 1700).is_empty());
    assert_eq!(up(&t, A, 1800), None);
}

#[test]
fn combo_down_fires_on_second_press() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot"))]);
    assert_eq!(kind(down(&t, A, 0)), Some(GestureKind::Down));

    let g = down(&t, B, 100).expect("combo");
    assert_eq!(g.kind, GestureKind::ComboDown);
    assert_eq!(g.primary_key, PhysicalKey(A));
    assert_eq!(g.combo_key, Some(PhysicalKey(B)));
    assert_eq!(t.combo_keys(), (Some(PhysicalKey(A)), Some(PhysicalKey(B))));

    assert_eq!(up(&t, B, 200), None, "combo participants are silent on release");
    assert_eq!(t.combo_keys(), (None, None));
    assert_eq!(up(&t, A, 250), None);
}

#[test]
fn combo_outside_window_is_two_solo_presses() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot"))]);
    down(&t, A, 0);
    assert_eq!(kind(down(&t, B, 301)), Some(GestureKind::Down));
    assert_eq!(kind(up(&t, B, 350)), Some(GestureKind::Up));
    assert_eq!(kind(up(&t, A, 360)), Some(GestureKind::ShortPress));
}

#[test]
fn combo_window_bound_is_inclusive() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot"))]);
    down(&t, A, 0);
    assert_eq!(kind(down(&t, B, 300)), Some(GestureKind::ComboDown));
}

#[test]
fn unpaired_keys_never_form_a_combo() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot"))]);
    down(&t, A, 0);
    assert_eq!(kind(down(&t, 1, 50)), Some(GestureKind::Down));
    // The unpaired key became the new candidate.
    assert_eq!(t.combo_keys(), (Some(PhysicalKey(1)), None));
}

#[test]
fn combo_cancels_solo_long_press() {
    let t = tracker(vec![
        Rule::new(A, GestureKind::LongPress, 500, cmd("lp")),
        Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot")),
    ]);
    down(&t, A, 0);
    down(&t, B, 100);
    assert!(poll(&t, 700).is_empty());
}

#[test]
fn combo_long_press_fires_while_both_held() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboLongPress, 1000, cmd("mute"))]);
    down(&t, A, 0);
    assert_eq!(kind(down(&t, B, 50)), Some(GestureKind::ComboDown));

    assert!(poll(&t, 900).is_empty());
    let fires = poll(&t, 1100);
    assert_eq!(fires.len(), 1);
    let fire = &fires[0];
    assert_eq!(fire.gesture.kind, GestureKind::ComboLongPress);
    assert_eq!(fire.gesture.primary_key, PhysicalKey(A));
    assert_eq!(fire.gesture.combo_key, Some(PhysicalKey(B)));
    assert_eq!(fire.gesture.held_duration_ms, 1050);
    assert!(poll(&t, 1200).is_empty());

    assert_eq!(up(&t, A, 1300), None);
    assert!(poll(&t, 2500).is_empty());
}

#[test]
fn combo_long_press_waits_for_floor() {
    let tunables = Tunables {
        long_press_min_ms: 800,
        ..Tunables::default()
    };
    let t = tracker_with(
        tunables,
        vec![Rule::combo(A, B, GestureKind::ComboLongPress, 300, cmd("mute"))],
    );
    down(&t, A, 0);
    assert_eq!(kind(down(&t, B, 100)), Some(GestureKind::ComboDown));

    assert!(poll(&t, 500).is_empty());
    let fires = poll(&t, 900);
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].gesture.held_duration_ms, 800);
}

#[test]
fn releasing_either_key_resets_whole_combo() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboLongPress, 1000, cmd("mute"))]);
    down(&t, A, 0);
    down(&t, B, 10);
    up(&t, A, 500);
    assert_eq!(t.combo_keys(), (None, None));
    assert!(poll(&t, 1500).is_empty());
    assert!(t.is_held(PhysicalKey(B)));
}

#[test]
fn waiting_candidate_clears_itself() {
    let t = tracker(vec![Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot"))]);
    down(&t, A, 0);
    assert_eq!(t.combo_keys(), (Some(PhysicalKey(A)), None));
    assert!(poll(&t, 301).is_empty());
    assert_eq!(t.combo_keys(), (None, None));
    assert_eq!(kind(down(&t, B, 310)), Some(GestureKind::Down));
}

#[test]
fn cancel_suppresses_gestures_and_clears_state() {
    let t = tracker(vec![
        Rule::new(A, GestureKind::LongPress, 500, cmd("lp")),
        Rule::combo(A, B, GestureKind::ComboDown, 0, cmd("shot")),
    ]);
    down(&t, A, 0);
    t.cancel(PhysicalKey(A));
    assert!(!t.is_held(PhysicalKey(A)));
    assert_eq!(t.combo_keys(), (None, None));
    assert!(poll(&t, 600).is_empty());
    assert_eq!(up(&t, A, 700), None);

    // A tap right after cancel is not counted as a double-click.
    down(&t, A, 750);
    assert_eq!(kind(up(&t, A, 800)), Some(GestureKind::Up));
}

#[test]
fn cancel_all_releases_every_key() {
    let t = tracker(vec![]);
    down(&t, A, 0);
    down(&t, B, 5);
    t.cancel_all();
    assert!(!t.is_held(PhysicalKey(A)));
    assert!(!t.is_held(PhysicalKey(B)));
    assert_eq!(up(&t, A, 50), None);
}

#[test]
fn synthetic_events_are_ignored() {
    let t = tracker(vec![]);
    assert_eq!(t.on_event(&RawEvent::down(A, 0).synthetic()), None);
    assert!(!t.is_held(PhysicalKey(A)));
    assert_eq!(t.on_event(&RawEvent::up(A, 10).synthetic()), None);
}

#[test]
fn trackers_do_not_share_state() {
    let first = tracker(vec![]);
    let second = tracker(vec![]);
    down(&first, A, 0);
    assert!(first.is_held(PhysicalKey(A)));
    assert!(!second.is_held(PhysicalKey(A)));
}

#[test]
fn reload_applies_new_tunables_to_next_press() {
    let rules = share(&RuleSet::default(), RuleSource::Builtin);
    let t = GestureTracker::new(Arc::clone(&rules));
    let slower = Tunables {
        short_press_min_ms: 50,
        ..Tunables::default()
    };
    rules.store(Arc::new(Generation::build(
        &RuleSet::new(slower, vec![]),
        RuleSource::Store,
    )));
    down(&t, A, 0);
    assert_eq!(kind(up(&t, A, 100)), Some(GestureKind::ShortPress));
}
