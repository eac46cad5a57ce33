use supervisor::{run_watchdog, Supervisor};

#[test]
fn start_rejects_a_grace_period_shorter_than_five_seconds() {
    let argv = vec!["./demo-app".to_string()];
    let result = Supervisor::start(argv, 1);
    assert!(result.is_err());
}

#[test]
fn start_rejects_an_empty_argv() {
    let result = Supervisor::start(Vec::new(), 10);
    assert!(result.is_err());
}

#[test]
fn run_watchdog_rejects_a_forwarded_argv_missing_the_grace_seconds_field() {
    let forwarded = vec!["./watchdog.out".to_string()];
    let result = run_watchdog(forwarded);
    assert!(result.is_err());
}

#[test]
fn run_watchdog_rejects_a_non_numeric_grace_seconds_field() {
    let forwarded = vec![
        "./watchdog.out".to_string(),
        "soon".to_string(),
        "./demo-app".to_string(),
    ];
    let result = run_watchdog(forwarded);
    assert!(result.is_err());
}
