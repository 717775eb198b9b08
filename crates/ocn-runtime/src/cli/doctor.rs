use ocn_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("opencane-runtime doctor");
    println!("=======================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_durable_store_path(config, &mut all_passed);
    check_anthropic_key(&mut all_passed);
    check_auth_token(config, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            let tag = match issue.severity {
                ConfigSeverity::Error => "ERROR",
                ConfigSeverity::Warning => "WARN",
            };
            println!("      [{tag}] {}", issue.message);
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_durable_store_path(config: &Config, all_passed: &mut bool) {
    let path = std::path::Path::new(&config.lifelog.sqlite_path);
    let parent_ok = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.exists() || std::fs::create_dir_all(parent).is_ok(),
        _ => true,
    };
    print_check(
        "Durable store directory writable",
        parent_ok,
        config.lifelog.sqlite_path.clone(),
    );
    if !parent_ok {
        *all_passed = false;
    }
}

fn check_anthropic_key(all_passed: &mut bool) {
    let ok = std::env::var("ANTHROPIC_API_KEY").map(|v| !v.is_empty()).unwrap_or(false);
    print_check(
        "ANTHROPIC_API_KEY set",
        ok,
        if ok { "set".into() } else { "not set".into() },
    );
    if !ok {
        *all_passed = false;
    }
}

fn check_auth_token(config: &Config, all_passed: &mut bool) {
    if !config.hardware.auth.enabled {
        print_check("Control API auth", true, "disabled (dev mode)".into());
        return;
    }
    let has_token = config.hardware.auth.token.as_deref().is_some_and(|t| !t.is_empty());
    print_check(
        "Control API auth",
        has_token,
        if has_token {
            "token configured".into()
        } else {
            "auth.enabled is true but no token is set".into()
        },
    );
    if !has_token {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
