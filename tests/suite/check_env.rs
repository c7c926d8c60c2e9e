//! `kiln check-env`: typed service settings from the process env and dotenv files.

use std::process::Output;

use kiln_config::SERVICE_SCHEMA;

use crate::common::{Workspace, stderr, stdout};

const TEMPLATE: &str = "\
TELEGRAM_BOT_TOKEN=
DB_URL=postgresql+asyncpg://bot:bot@db/bot
REDIS_URL=redis://redis:6379/0
HMAC_SECRET=
ADMIN_INITIAL_TOKEN=
SENTRY_DSN=
WEBHOOK_BASE_URL=https://example.invalid
ALLOWED_ADMIN_ROLES=[\"main\",\"manager\",\"support\"]
VERIFICATION_CODE_TTL=600
ADMIN_TOKEN_TTL=900
REFERRAL_REWARD_DAILY_CAP=1000
REFERRAL_ACTIVITY_MINUTES=10
";

const REQUIRED: &str = "\
TELEGRAM_BOT_TOKEN=123456:super-secret-telegram
DB_URL=postgresql+asyncpg://bot:pw@db/bot
REDIS_URL=redis://redis:6379/0
HMAC_SECRET=hmac-super-secret
ADMIN_INITIAL_TOKEN=admin-super-secret
";

fn check_env(ws: &Workspace, extra: &[(&str, &str)]) -> Output {
    let dir = ws.path("service");
    let mut cmd = ws.kiln();
    cmd.arg("check-env").arg(&dir);
    for spec in SERVICE_SCHEMA {
        cmd.env_remove(spec.name);
    }
    cmd.envs(extra.iter().copied());
    cmd.output().unwrap()
}

#[test]
fn complete_env_file_is_valid() {
    let ws = Workspace::new();
    ws.write("service/.env.example", TEMPLATE);
    ws.write("service/.env", REQUIRED);

    let output = check_env(&ws, &[]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("service settings OK"));
    assert!(!stderr(&output).contains("warning"), "{}", stderr(&output));
}

#[test]
fn every_problem_is_reported_without_secrets() {
    let ws = Workspace::new();
    ws.write("service/.env.example", TEMPLATE);
    ws.write(
        "service/.env",
        "TELEGRAM_BOT_TOKEN=123456:super-secret-telegram\n\
         WEBHOOK_BASE_URL=ftp://example.invalid\n\
         ADMIN_TOKEN_TTL=soon\n",
    );

    let output = check_env(&ws, &[]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    for name in [
        "DB_URL",
        "REDIS_URL",
        "HMAC_SECRET",
        "ADMIN_INITIAL_TOKEN",
        "WEBHOOK_BASE_URL",
        "ADMIN_TOKEN_TTL",
    ] {
        assert!(err.contains(name), "{name} not reported:\n{err}");
    }
    assert!(!err.contains("super-secret"), "{err}");
    assert!(!stdout(&output).contains("super-secret"));
}

#[test]
fn process_env_overrides_files() {
    let ws = Workspace::new();
    ws.write("service/.env.example", TEMPLATE);
    ws.write("service/.env", REQUIRED);
    ws.write("service/.env.local", "ADMIN_TOKEN_TTL=later\n");

    assert_eq!(check_env(&ws, &[]).status.code(), Some(1));
    let fixed = check_env(&ws, &[("ADMIN_TOKEN_TTL", "120")]);
    assert_eq!(fixed.status.code(), Some(0), "stderr: {}", stderr(&fixed));
}

#[test]
fn template_drift_is_a_warning() {
    let ws = Workspace::new();
    ws.write("service/.env.example", "TELEGRAM_BOT_TOKEN=\nLEGACY_FLAG=1\n");
    ws.write("service/.env", REQUIRED);

    let output = check_env(&ws, &[]);
    assert_eq!(output.status.code(), Some(0));
    let err = stderr(&output);
    assert!(err.contains("warning: LEGACY_FLAG is not a known service setting"), "{err}");
    assert!(err.contains("warning: DB_URL is part of the service settings"), "{err}");
}

#[test]
fn admin_roles_use_the_services_json_form() {
    let ws = Workspace::new();
    ws.write("service/.env.example", TEMPLATE);
    ws.write(
        "service/.env",
        &format!("{REQUIRED}ALLOWED_ADMIN_ROLES=main,support\n"),
    );

    let comma = check_env(&ws, &[]);
    assert_eq!(comma.status.code(), Some(1));
    assert!(stderr(&comma).contains("ALLOWED_ADMIN_ROLES"), "{}", stderr(&comma));

    let json = check_env(&ws, &[("allowed_admin_roles", r#"["main","support"]"#)]);
    assert_eq!(json.status.code(), Some(0), "stderr: {}", stderr(&json));
}
